use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub mod hosts;
pub mod loader;

pub use hosts::HostsFile;
pub use loader::load_config;

use crate::error::{ErrorCode, HarnessError, Result};
use crate::import::Separator;
use crate::reduce::ReductionSpec;

/// How the cluster is brought up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    /// In-process worker nodes
    #[default]
    Local,
    /// Worker processes listed in a hosts file
    HostsFile,
}

impl std::str::FromStr for ClusterMode {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(ClusterMode::Local),
            "hosts_file" | "hosts-file" => Ok(ClusterMode::HostsFile),
            other => Err(HarnessError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("unknown cluster mode '{}' (expected local or hosts_file)", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub mode: ClusterMode,
    #[serde(default = "default_nodes")]
    pub nodes: usize,
    #[serde(default)]
    pub hosts_file: Option<PathBuf>,
    #[serde(default = "default_startup_timeout", with = "humantime_serde")]
    pub startup_timeout: Duration,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mode: ClusterMode::Local,
            nodes: default_nodes(),
            hosts_file: None,
            startup_timeout: default_startup_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl ClusterConfig {
    /// Addresses listed in the configured hosts file
    pub fn resolve_hosts(&self) -> Result<Vec<SocketAddr>> {
        let path = self.hosts_file.as_ref().ok_or_else(|| {
            HarnessError::config_with_code(
                ErrorCode::CONFIG_HOSTS_FILE,
                "cluster.mode is hosts_file but no cluster.hosts_file is set",
            )
        })?;
        HostsFile::load(path)?.addresses()
    }
}

/// One dataset imported and reduced per cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    /// File or folder name under the import folder
    pub file: String,
    pub key: String,
    /// Reduction timeout for this dataset
    #[serde(default = "default_reduce_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Replication factor relative to the base dataset
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl DatasetEntry {
    pub fn new(file: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            key: key.into(),
            timeout: default_reduce_timeout(),
            multiplier: default_multiplier(),
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnRange {
    #[serde(default)]
    pub min: usize,
    /// Exclusive; defaults to the dataset's column count
    #[serde(default)]
    pub max: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Detected from the first line when unset
    #[serde(default)]
    pub separator: Option<Separator>,
    /// Detected from the first line when unset
    #[serde(default)]
    pub header: Option<bool>,
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            separator: None,
            header: None,
            chunk_rows: default_chunk_rows(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Relative tolerance for floating point comparisons; 0 means exact
    #[serde(default)]
    pub tolerance: f64,
    /// Treat warnings in the event stream as anomalies
    #[serde(default)]
    pub strict_health: bool,
}

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    pub import_folder: PathBuf,
    pub datasets: Vec<DatasetEntry>,
    #[serde(default = "default_expressions")]
    pub expressions: Vec<ReductionSpec>,
    #[serde(default)]
    pub columns: ColumnRange,
    #[serde(default = "default_import_timeout", with = "humantime_serde")]
    pub import_timeout: Duration,
    #[serde(default)]
    pub import: ImportOptions,
    #[serde(default)]
    pub verification: VerificationConfig,
    /// Seed for dataset sampling; random when unset
    #[serde(default)]
    pub seed: Option<u64>,
    /// Verify only this many randomly chosen datasets
    #[serde(default)]
    pub sample: Option<usize>,
    /// Leave datasets on the nodes after their cycle
    #[serde(default)]
    pub keep_datasets: bool,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_nodes() -> usize {
    2
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_event_buffer() -> usize {
    1024
}

fn default_reduce_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_chunk_rows() -> usize {
    4096
}

fn default_expressions() -> Vec<ReductionSpec> {
    vec![ReductionSpec::sum_each()]
}

fn default_import_timeout() -> Duration {
    Duration::from_secs(2000)
}

fn default_max_in_flight() -> usize {
    16
}

impl HarnessConfig {
    /// Defaults for everything but the source folder and datasets
    pub fn new(import_folder: impl Into<PathBuf>, datasets: Vec<DatasetEntry>) -> Self {
        Self {
            cluster: ClusterConfig::default(),
            import_folder: import_folder.into(),
            datasets,
            expressions: default_expressions(),
            columns: ColumnRange::default(),
            import_timeout: default_import_timeout(),
            import: ImportOptions::default(),
            verification: VerificationConfig::default(),
            seed: None,
            sample: None,
            keep_datasets: false,
            max_in_flight: default_max_in_flight(),
        }
    }

    /// Apply `SUMCHECK_*` environment overrides
    pub fn merge_env_vars(&mut self) -> Result<()> {
        if let Ok(nodes) = std::env::var("SUMCHECK_NODES") {
            self.cluster.nodes = nodes.parse().map_err(|_| {
                HarnessError::config_with_code(
                    ErrorCode::CONFIG_INVALID_VALUE,
                    format!("SUMCHECK_NODES must be a positive integer, got '{}'", nodes),
                )
            })?;
        }

        if let Ok(mode) = std::env::var("SUMCHECK_CLUSTER_MODE") {
            self.cluster.mode = mode.parse()?;
        }

        if let Ok(hosts) = std::env::var("SUMCHECK_HOSTS_FILE") {
            self.cluster.hosts_file = Some(PathBuf::from(hosts));
        }

        if let Ok(folder) = std::env::var("SUMCHECK_IMPORT_FOLDER") {
            self.import_folder = PathBuf::from(folder);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| {
            Err(HarnessError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                message,
            ))
        };

        if self.datasets.is_empty() {
            return invalid("at least one dataset is required".to_string());
        }
        if self.expressions.is_empty() {
            return invalid("at least one expression is required".to_string());
        }
        if self.cluster.mode == ClusterMode::Local && self.cluster.nodes == 0 {
            return invalid("cluster.nodes must be at least 1".to_string());
        }
        if self.cluster.mode == ClusterMode::HostsFile && self.cluster.hosts_file.is_none() {
            return invalid("cluster.hosts_file is required in hosts_file mode".to_string());
        }
        if self.import.chunk_rows == 0 {
            return invalid("import.chunk_rows must be at least 1".to_string());
        }
        if self.max_in_flight == 0 {
            return invalid("max_in_flight must be at least 1".to_string());
        }
        if self.verification.tolerance.is_nan() || self.verification.tolerance < 0.0 {
            return invalid("verification.tolerance must be non-negative".to_string());
        }
        if let Some(max) = self.columns.max {
            if self.columns.min > max {
                return invalid(format!(
                    "columns.min ({}) is greater than columns.max ({})",
                    self.columns.min, max
                ));
            }
        }
        if self.sample == Some(0) {
            return invalid("sample must be at least 1".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for dataset in &self.datasets {
            if !seen.insert(dataset.key.as_str()) {
                return invalid(format!("dataset key '{}' is listed twice", dataset.key));
            }
            if !dataset.multiplier.is_finite() || dataset.multiplier <= 0.0 {
                return invalid(format!(
                    "dataset '{}' has invalid multiplier {}",
                    dataset.key, dataset.multiplier
                ));
            }
        }
        Ok(())
    }
}
