use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::cluster::{ClusterHandle, NodeRequest, NodeResponse};
use crate::error::{HarnessError, Result};
use crate::keys::KeyRegistry;
use crate::store::{ColumnSummary, Encoding};

/// Cluster-wide view of one imported dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub key: String,
    pub rows: usize,
    pub rows_per_node: Vec<usize>,
    pub columns: Vec<ColumnSummary>,
}

impl DatasetSummary {
    /// Chunk count per encoding over all columns
    pub fn encodings(&self) -> BTreeMap<Encoding, usize> {
        let mut totals = BTreeMap::new();
        for column in &self.columns {
            for (encoding, count) in &column.encodings {
                *totals.entry(*encoding).or_insert(0) += count;
            }
        }
        totals
    }

    pub fn na_total(&self) -> usize {
        self.columns.iter().map(|c| c.na_count).sum()
    }
}

/// Collect NA counts and chunk encodings from every node
pub async fn inspect(
    cluster: &ClusterHandle,
    registry: &KeyRegistry,
    key: &str,
) -> Result<DatasetSummary> {
    cluster.ensure_operational()?;
    let metadata = registry.dataset(key)?;
    let dataset = registry.qualified(key);

    let mut summary = DatasetSummary {
        key: key.to_string(),
        rows: 0,
        rows_per_node: Vec::with_capacity(cluster.size()),
        columns: vec![ColumnSummary::default(); metadata.column_count],
    };

    for (node, result) in cluster
        .call_all(|_| NodeRequest::Inspect {
            dataset: dataset.clone(),
        })
        .await
    {
        let shard = match result.map_err(|e| e.with_location(key, None))? {
            NodeResponse::Inspection { summary } => summary,
            other => return Err(other.into_error(node, key)),
        };
        summary.rows += shard.rows;
        summary.rows_per_node.push(shard.rows);
        if shard.rows > 0 && shard.columns.len() != metadata.column_count {
            return Err(HarnessError::internal(format!(
                "node {} reports {} columns for '{}', expected {}",
                node,
                shard.columns.len(),
                key,
                metadata.column_count
            )));
        }
        for (total, column) in summary.columns.iter_mut().zip(shard.columns) {
            total.na_count += column.na_count;
            for (encoding, count) in column.encodings {
                *total.encodings.entry(encoding).or_insert(0) += count;
            }
        }
    }

    debug!(
        "Inspected '{}': {} rows, {} NA cells, encodings {:?}",
        key,
        summary.rows,
        summary.na_total(),
        summary.encodings()
    );
    Ok(summary)
}
