use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub mod codes;

pub use codes::{describe_error_code, ErrorCode};

use crate::cluster::NodeId;
use crate::health::Anomaly;
use crate::reduce::Scalar;

/// The unified error type for the verification harness
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E2001] Cluster provisioning failed: {reachable} of {required} nodes reachable")]
    Provision {
        required: usize,
        reachable: usize,
        failures: Vec<String>,
    },

    #[error("[E2002] Node {node} failed: {reason}")]
    NodeFailure {
        node: NodeId,
        dataset: Option<String>,
        column: Option<usize>,
        reason: String,
    },

    #[error("[E2003] Cluster is degraded (down nodes: {down:?}); rebuild required")]
    ClusterDegraded { down: Vec<NodeId> },

    #[error("[E2004] Cluster was already torn down")]
    ClusterTornDown,

    #[error("[E3001] Dataset key '{key}' already used in this session")]
    DuplicateKey { key: String },

    #[error("[E3002] Dataset '{key}' is not usable: {state}")]
    UnknownDataset { key: String, state: String },

    #[error("[E3003] Import source not found: {}", .path.display())]
    SourceNotFound { path: PathBuf },

    #[error("[E3004] Import of '{key}' timed out after {timeout:?} ({completed}/{total} nodes done)")]
    ImportTimeout {
        key: String,
        timeout: Duration,
        completed: usize,
        total: usize,
    },

    #[error("[E3005] Parse of '{key}' failed on node {node}: {reason}")]
    Parse {
        key: String,
        node: NodeId,
        reason: String,
    },

    #[error("[E3006] I/O error on {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[E4001] Column range [{min_col}, {max_col}) invalid for '{key}' with {column_count} columns")]
    ColumnRange {
        key: String,
        min_col: usize,
        max_col: usize,
        column_count: usize,
    },

    #[error("[E4002] Reduction on '{key}' timed out after {timeout:?} ({completed}/{total} columns merged)")]
    ReductionTimeout {
        key: String,
        timeout: Duration,
        completed: usize,
        total: usize,
    },

    #[error("[E4003] Result scope from reset {issued} is stale (namespace is at reset {current})")]
    StaleResultScope { issued: u64, current: u64 },

    #[error("[E5001] {0}")]
    Inconsistency(Box<InconsistencyDetail>),

    #[error("[E5002] Result vector for '{dataset}' has {actual} columns, expected {expected}")]
    VectorLengthMismatch {
        dataset: String,
        expected: usize,
        actual: usize,
    },

    #[error("[E6001] Cluster reported {} anomalies: {}", .anomalies.len(), summarize_anomalies(.anomalies))]
    Anomalies { anomalies: Vec<Anomaly> },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Boxed data for the Inconsistency variant
#[derive(Debug, Clone)]
pub struct InconsistencyDetail {
    pub dataset: String,
    pub column: usize,
    pub multiplier: f64,
    pub expected: Scalar,
    pub observed: Scalar,
}

impl fmt::Display for InconsistencyDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Column {} of '{}' is {} but base × {} is {}",
            self.column, self.dataset, self.observed, self.multiplier, self.expected
        )
    }
}

fn summarize_anomalies(anomalies: &[Anomaly]) -> String {
    let mut shown: Vec<String> = anomalies.iter().take(3).map(|a| a.to_string()).collect();
    if anomalies.len() > 3 {
        shown.push(format!("... ({} more)", anomalies.len() - 3));
    }
    shown.join("; ")
}

impl HarnessError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: ErrorCode::CONFIG_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with specific code
    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error for broken invariants
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_INTERNAL_ERROR,
            message: message.into(),
            source: None,
        }
    }

    /// Create a node failure without dataset context
    pub fn node_failure(node: NodeId, reason: impl Into<String>) -> Self {
        Self::NodeFailure {
            node,
            dataset: None,
            column: None,
            reason: reason.into(),
        }
    }

    /// Attach I/O context to an error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. } | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
            _ => {}
        }
        self
    }

    /// Attach the dataset and column a node failure happened on
    pub fn with_location(mut self, key: &str, at_column: Option<usize>) -> Self {
        if let Self::NodeFailure {
            dataset, column, ..
        } = &mut self
        {
            *dataset = Some(key.to_string());
            if at_column.is_some() {
                *column = at_column;
            }
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. } | Self::Other { code, .. } => *code,
            Self::Provision { .. } => ErrorCode::CLUSTER_PROVISION_FAILED,
            Self::NodeFailure { .. } => ErrorCode::CLUSTER_NODE_FAILURE,
            Self::ClusterDegraded { .. } => ErrorCode::CLUSTER_DEGRADED,
            Self::ClusterTornDown => ErrorCode::CLUSTER_TORN_DOWN,
            Self::DuplicateKey { .. } => ErrorCode::DATASET_DUPLICATE_KEY,
            Self::UnknownDataset { .. } => ErrorCode::DATASET_UNKNOWN,
            Self::SourceNotFound { .. } => ErrorCode::DATASET_SOURCE_NOT_FOUND,
            Self::ImportTimeout { .. } => ErrorCode::DATASET_IMPORT_TIMEOUT,
            Self::Parse { .. } => ErrorCode::DATASET_PARSE_FAILED,
            Self::Io { .. } => ErrorCode::DATASET_IO_ERROR,
            Self::ColumnRange { .. } => ErrorCode::REDUCE_COLUMN_RANGE,
            Self::ReductionTimeout { .. } => ErrorCode::REDUCE_TIMEOUT,
            Self::StaleResultScope { .. } => ErrorCode::REDUCE_STALE_SCOPE,
            Self::Inconsistency(_) => ErrorCode::VERIFY_INCONSISTENT,
            Self::VectorLengthMismatch { .. } => ErrorCode::VERIFY_LENGTH_MISMATCH,
            Self::Anomalies { .. } => ErrorCode::HEALTH_ANOMALIES,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.code() / 1000 {
            1 => 2,
            2 => 3,
            3 => 4,
            4 => 5,
            5 => 6,
            6 => 7,
            _ => 1,
        }
    }

    /// Whether the caller may retry the whole call, possibly with a larger timeout
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ImportTimeout { .. } | Self::ReductionTimeout { .. }
        )
    }

    /// Whether the cluster must be torn down and rebuilt before further use
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            Self::NodeFailure { .. } | Self::ClusterDegraded { .. } | Self::ClusterTornDown
        )
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, .. } => format!("Configuration problem: {}", message),
            Self::Provision {
                required,
                reachable,
                failures,
            } => {
                let mut msg = format!(
                    "Could not build a cluster of {} nodes ({} reachable)",
                    required, reachable
                );
                for failure in failures {
                    msg.push_str(&format!("\n  - {}", failure));
                }
                msg
            }
            Self::NodeFailure {
                node,
                dataset,
                column,
                reason,
            } => {
                let mut msg = format!("Node {} failed", node);
                if let Some(d) = dataset {
                    msg.push_str(&format!(" on dataset '{}'", d));
                }
                if let Some(c) = column {
                    msg.push_str(&format!(" at column {}", c));
                }
                format!("{}: {}", msg, reason)
            }
            Self::Inconsistency(detail) => format!("Scaling check failed: {}", detail),
            Self::Anomalies { anomalies } => {
                let mut msg = format!("Cluster health check found {} anomalies", anomalies.len());
                for anomaly in anomalies {
                    msg.push_str(&format!("\n  - {}", anomaly));
                }
                msg
            }
            other => {
                let text = other.to_string();
                match text.split_once("] ") {
                    Some((_, rest)) => rest.to_string(),
                    None => text,
                }
            }
        }
    }

    /// Get a developer-friendly error message with full chain
    pub fn developer_message(&self) -> String {
        let mut msg = format!("{} ({})", self, describe_error_code(self.code()));
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            msg.push_str(&format!("\n  caused by: {}", err));
            source = err.source();
        }
        msg
    }
}

/// Type alias for Results using HarnessError
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Type alias for application Results (using anyhow for flexibility)
pub type AppResult<T> = anyhow::Result<T>;

impl From<serde_yaml::Error> for HarnessError {
    fn from(err: serde_yaml::Error) -> Self {
        HarnessError::config_with_code(ErrorCode::CONFIG_INVALID_YAML, "Invalid YAML syntax")
            .with_source(err)
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::config_with_code(ErrorCode::CONFIG_INVALID_JSON, "Invalid JSON syntax")
            .with_source(err)
    }
}

impl From<toml::de::Error> for HarnessError {
    fn from(err: toml::de::Error) -> Self {
        HarnessError::config_with_code(ErrorCode::CONFIG_INVALID_TOML, "Invalid TOML syntax")
            .with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_exit_codes() {
        let err = HarnessError::DuplicateKey {
            key: "cA".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::DATASET_DUPLICATE_KEY);
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().starts_with("[E3001]"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_timeouts_are_retryable() {
        let err = HarnessError::ReductionTimeout {
            key: "cA".to_string(),
            timeout: Duration::from_secs(5),
            completed: 3,
            total: 54,
        };
        assert!(err.is_retryable());
        assert!(!err.requires_rebuild());
        assert!(err.user_message().contains("timed out"));
        assert!(!err.user_message().contains("[E4002]"));
    }

    #[test]
    fn test_node_failure_location() {
        let err = HarnessError::node_failure(NodeId(1), "connection reset")
            .with_location("cB", Some(21));
        assert!(err.requires_rebuild());
        let msg = err.user_message();
        assert!(msg.contains("Node 1"));
        assert!(msg.contains("'cB'"));
        assert!(msg.contains("column 21"));
    }

    #[test]
    fn test_config_error_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "harness.yaml");
        let err = HarnessError::config_with_code(ErrorCode::CONFIG_NOT_FOUND, "Config not found")
            .with_source(io_err);
        assert_eq!(err.exit_code(), 2);
        assert!(err.developer_message().contains("caused by: harness.yaml"));
    }
}
