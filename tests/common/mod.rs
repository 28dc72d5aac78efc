//! Common test utilities and helpers

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sumcheck::cluster::{build, ClusterHandle};
use sumcheck::config::{ClusterConfig, ImportOptions};
use sumcheck::import::Importer;
use sumcheck::keys::KeyRegistry;
use sumcheck::reduce::{ColumnResultVector, ReductionEngine, ReductionSpec};
use sumcheck::testing::TestDatasets;

pub const TIMEOUT: Duration = Duration::from_secs(30);

/// Rows whose first column sums to 179
pub fn base_rows() -> Vec<Vec<i64>> {
    vec![
        vec![100, 3, 7],
        vec![50, -2, 0],
        vec![20, 4, 11],
        vec![9, 0, -5],
    ]
}

pub fn rows_to_csv(rows: &[Vec<i64>]) -> String {
    rows.iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            cells.join(",") + "\n"
        })
        .collect()
}

/// Test context builder for a folder of datasets
pub struct TestContextBuilder {
    files: Vec<(String, String)>,
}

impl TestContextBuilder {
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    pub fn with_file(mut self, name: &str, content: &str) -> Self {
        self.files.push((name.to_string(), content.to_string()));
        self
    }

    /// Add `name` holding `content` and `name` replicated `times` times
    pub fn with_scaled(mut self, name: &str, content: &str, times: usize) -> Self {
        self.files.push((name.to_string(), content.to_string()));
        self.files
            .push((scaled_name(name, times), content.repeat(times)));
        self
    }

    pub fn build(self) -> TestDatasets {
        let datasets = TestDatasets::new().expect("temp dir");
        for (name, content) in &self.files {
            datasets.write(name, content).expect("write dataset");
        }
        datasets
    }
}

pub fn scaled_name(name: &str, times: usize) -> String {
    format!("{}.{}x", name, times)
}

/// A local cluster plus the pieces a session would own
pub struct Harness {
    pub cluster: ClusterHandle,
    pub registry: Arc<KeyRegistry>,
    pub importer: Importer,
    pub engine: ReductionEngine,
}

impl Harness {
    pub async fn local(nodes: usize) -> Self {
        let config = ClusterConfig {
            nodes,
            ..ClusterConfig::default()
        };
        Self::on(build(&config).await.expect("local cluster"))
    }

    pub fn on(cluster: ClusterHandle) -> Self {
        let registry = Arc::new(KeyRegistry::new("test"));
        Self {
            importer: Importer::new(registry.clone(), ImportOptions::default()),
            engine: ReductionEngine::new(registry.clone(), 8),
            cluster,
            registry,
        }
    }

    pub async fn import(&self, folder: &Path, file: &str, key: &str) -> sumcheck::Result<()> {
        let source = self.registry.stage(folder, file)?;
        self.importer
            .import(&self.cluster, source, key, TIMEOUT)
            .await
            .map(|_| ())
    }

    /// Sum every column of `key`
    pub async fn sums(&self, key: &str) -> sumcheck::Result<ColumnResultVector> {
        let columns = self.registry.dataset(key)?.column_count;
        let scope = self.engine.zero_reset();
        self.engine
            .reduce_columns(
                &self.cluster,
                key,
                ReductionSpec::sum_each(),
                0,
                columns,
                scope,
                TIMEOUT,
            )
            .await
    }
}
