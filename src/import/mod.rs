//! Partitioned import of text sources into distributed datasets

pub mod importer;
pub mod inspect;
pub mod parser;

pub use importer::Importer;
pub use inspect::{inspect, DatasetSummary};
pub use parser::{parse_segments, split_file, FileSegment, ParseSetup, Separator};

use serde::{Deserialize, Serialize};

use crate::cluster::NodeId;

/// What one node holds of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub partition: usize,
    pub node: NodeId,
    /// Session-qualified key the node stores the shard under
    pub shard_key: String,
    pub rows: usize,
    pub chunks: usize,
}

/// Result of a successful import; immutable once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub key: String,
    pub row_count: usize,
    pub column_count: usize,
    pub parse_time_ms: u64,
    pub partitions: Vec<PartitionInfo>,
}
