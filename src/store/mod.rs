//! Node-local columnar storage
//!
//! Parsed shards are kept per qualified dataset key as compressed column
//! chunks. A shard is staged after parsing and only becomes readable once
//! the coordinator commits it.

pub mod chunk;
pub mod shard;

pub use chunk::{CellValue, Chunk, ChunkBuilder, ChunkData, Encoding};
pub use shard::{ColumnSummary, Shard, ShardBuilder, ShardStore, ShardSummary};

use thiserror::Error;

/// Failures inside a node's shard store
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("dataset '{0}' already exists on this node")]
    AlreadyExists(String),

    #[error("dataset '{0}' has no staged shard to commit")]
    NotStaged(String),

    #[error("dataset '{0}' is not stored on this node")]
    UnknownDataset(String),

    #[error("column {column} out of range for a shard with {column_count} columns")]
    ColumnOutOfRange { column: usize, column_count: usize },

    #[error("row {row} has {found} cells, expected at most {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}
