use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::chunk::{CellValue, Chunk, ChunkBuilder, Encoding};
use super::StoreError;
use crate::reduce::{Combine, Partial, ReduceOp};

/// One node's slice of a dataset: a chunk list per column
#[derive(Debug, Clone, Default)]
pub struct Shard {
    columns: Vec<Vec<Chunk>>,
    rows: usize,
}

impl Shard {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Reduce one column; chunks are reduced in parallel and folded in order
    pub fn partial(&self, column: usize, op: ReduceOp) -> Result<Partial, StoreError> {
        if self.is_empty() {
            return Ok(Partial::identity(op));
        }
        let chunks = self
            .columns
            .get(column)
            .ok_or(StoreError::ColumnOutOfRange {
                column,
                column_count: self.columns.len(),
            })?;
        let partials: Vec<Partial> = chunks.par_iter().map(|chunk| chunk.partial(op)).collect();
        Ok(Partial::identity(op).combine_all(partials))
    }

    pub fn summary(&self) -> ShardSummary {
        let columns = self
            .columns
            .iter()
            .map(|chunks| {
                let mut encodings = BTreeMap::new();
                for chunk in chunks {
                    *encodings.entry(chunk.encoding()).or_insert(0) += 1;
                }
                ColumnSummary {
                    na_count: chunks.iter().map(Chunk::na_count).sum(),
                    encodings,
                }
            })
            .collect();
        ShardSummary {
            rows: self.rows,
            columns,
        }
    }
}

/// Row-wise builder that cuts every column into chunks of `chunk_rows`
#[derive(Debug)]
pub struct ShardBuilder {
    chunk_rows: usize,
    open: Vec<ChunkBuilder>,
    columns: Vec<Vec<Chunk>>,
    rows: usize,
}

impl ShardBuilder {
    pub fn new(column_count: usize, chunk_rows: usize) -> Self {
        let chunk_rows = chunk_rows.max(1);
        Self {
            chunk_rows,
            open: (0..column_count)
                .map(|_| ChunkBuilder::with_capacity(chunk_rows))
                .collect(),
            columns: vec![Vec::new(); column_count],
            rows: 0,
        }
    }

    pub fn column_count(&self) -> usize {
        self.open.len()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Append one row; short rows are padded with NA
    pub fn push_row(&mut self, cells: &[CellValue]) -> Result<(), StoreError> {
        if cells.len() > self.open.len() {
            return Err(StoreError::RaggedRow {
                row: self.rows,
                expected: self.open.len(),
                found: cells.len(),
            });
        }
        for (index, builder) in self.open.iter_mut().enumerate() {
            builder.push(cells.get(index).copied().unwrap_or(CellValue::Na));
        }
        self.rows += 1;
        if self.rows % self.chunk_rows == 0 {
            self.seal();
        }
        Ok(())
    }

    fn seal(&mut self) {
        let chunk_rows = self.chunk_rows;
        for (builder, chunks) in self.open.iter_mut().zip(self.columns.iter_mut()) {
            let full = std::mem::replace(builder, ChunkBuilder::with_capacity(chunk_rows));
            chunks.push(full.finish());
        }
    }

    pub fn finish(mut self) -> Shard {
        if self.open.first().is_some_and(|b| !b.is_empty()) {
            self.seal();
        }
        Shard {
            columns: self.columns,
            rows: self.rows,
        }
    }
}

/// Per-column inspection data for one shard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub na_count: usize,
    pub encodings: BTreeMap<Encoding, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardSummary {
    pub rows: usize,
    pub columns: Vec<ColumnSummary>,
}

/// Node-local dataset storage with staged and committed shards
///
/// Committed shards are immutable and handed out as shared snapshots, so a
/// reduction can run without holding the store.
#[derive(Debug, Default)]
pub struct ShardStore {
    staged: HashMap<String, Shard>,
    committed: HashMap<String, Arc<Shard>>,
}

impl ShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a parsed shard until the coordinator commits it
    pub fn stage(&mut self, key: &str, shard: Shard) -> Result<(), StoreError> {
        if self.staged.contains_key(key) || self.committed.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        self.staged.insert(key.to_string(), shard);
        Ok(())
    }

    pub fn commit(&mut self, key: &str) -> Result<(), StoreError> {
        let shard = self
            .staged
            .remove(key)
            .ok_or_else(|| StoreError::NotStaged(key.to_string()))?;
        self.committed.insert(key.to_string(), Arc::new(shard));
        Ok(())
    }

    /// Drop staged and committed data for `key`; true if anything was held
    pub fn drop_dataset(&mut self, key: &str) -> bool {
        let staged = self.staged.remove(key).is_some();
        let committed = self.committed.remove(key).is_some();
        staged || committed
    }

    /// Drop everything whose key starts with `prefix`
    pub fn drop_prefix(&mut self, prefix: &str) -> usize {
        let before = self.staged.len() + self.committed.len();
        self.staged.retain(|key, _| !key.starts_with(prefix));
        self.committed.retain(|key, _| !key.starts_with(prefix));
        before - self.staged.len() - self.committed.len()
    }

    pub fn shard(&self, key: &str) -> Result<Arc<Shard>, StoreError> {
        self.committed
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::UnknownDataset(key.to_string()))
    }

    pub fn dataset_count(&self) -> usize {
        self.committed.len()
    }
}
