use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use crate::config::DatasetEntry;
use crate::error::{HarnessError, Result};
use crate::health::Anomaly;
use crate::import::{DatasetMetadata, DatasetSummary};
use crate::reduce::{ColumnResultVector, ReductionSpec, Scalar};
use crate::store::Encoding;
use crate::verify::ScaleRelation;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Running,
    Passed,
    Failed { code: u16, message: String },
}

/// Results of one expression over one dataset
#[derive(Debug, Clone, Serialize)]
pub struct ExpressionReport {
    pub spec: ReductionSpec,
    pub min_col: usize,
    pub effective_multiplier: f64,
    pub values: Vec<Scalar>,
    /// Comparison against the first dataset; absent for the first dataset itself
    pub relation: Option<ScaleRelation>,
}

impl ExpressionReport {
    pub fn new(vector: &ColumnResultVector, effective_multiplier: f64) -> Self {
        Self {
            spec: vector.spec,
            min_col: vector.min_col,
            effective_multiplier,
            values: vector.values.clone(),
            relation: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub key: String,
    pub file: String,
    pub multiplier: f64,
    pub metadata: DatasetMetadata,
    pub na_cells: usize,
    pub encodings: BTreeMap<Encoding, usize>,
    pub expressions: Vec<ExpressionReport>,
}

impl DatasetReport {
    pub fn new(entry: &DatasetEntry, metadata: DatasetMetadata, summary: &DatasetSummary) -> Self {
        Self {
            key: entry.key.clone(),
            file: entry.file.clone(),
            multiplier: entry.multiplier,
            metadata,
            na_cells: summary.na_total(),
            encodings: summary.encodings(),
            expressions: Vec::new(),
        }
    }
}

/// Machine-readable record of one harness run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub session: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub seed: u64,
    pub nodes: usize,
    pub datasets: Vec<DatasetReport>,
    pub anomalies: Vec<Anomaly>,
    pub outcome: Outcome,
}

impl RunReport {
    pub fn new(seed: u64) -> Self {
        Self {
            session: None,
            started_at: Utc::now(),
            finished_at: None,
            seed,
            nodes: 0,
            datasets: Vec::new(),
            anomalies: Vec::new(),
            outcome: Outcome::Running,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    pub fn finish<T>(&mut self, result: &Result<T>) {
        self.finished_at = Some(Utc::now());
        self.outcome = match result {
            Ok(_) => Outcome::Passed,
            Err(e) => Outcome::Failed {
                code: e.code(),
                message: e.to_string(),
            },
        };
    }

    pub fn columns_verified(&self) -> usize {
        self.datasets
            .iter()
            .flat_map(|d| &d.expressions)
            .filter_map(|e| e.relation.as_ref())
            .map(|r| r.columns)
            .sum()
    }

    /// One-line summary for the terminal
    pub fn summary(&self) -> String {
        let status = match &self.outcome {
            Outcome::Running => "INCOMPLETE".to_string(),
            Outcome::Passed => "PASSED".to_string(),
            Outcome::Failed { code, .. } => format!("FAILED [E{:04}]", code),
        };
        format!(
            "{}: {} datasets on {} nodes, {} column comparisons, {} anomalies (seed {})",
            status,
            self.datasets.len(),
            self.nodes,
            self.columns_verified(),
            self.anomalies.len(),
            self.seed
        )
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| HarnessError::io(path, e))
    }
}
