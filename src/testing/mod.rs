//! Testing utilities and fixtures
//!
//! Scripted clusters for fault and ordering tests, and a scratch folder
//! for writing small datasets.

pub mod scripted;

pub use scripted::{NodeScript, ScriptedCluster, ScriptedTransport};

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::{DatasetEntry, HarnessConfig};
use crate::error::{HarnessError, Result};

/// Scratch import folder that is removed when dropped
pub struct TestDatasets {
    dir: TempDir,
}

impl TestDatasets {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().map_err(|e| HarnessError::io(std::env::temp_dir(), e))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file with the given content under the folder
    pub fn write(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).map_err(|e| HarnessError::io(&path, e))?;
        Ok(path)
    }

    /// Write integer rows as comma separated lines
    pub fn write_rows(&self, name: &str, rows: &[Vec<i64>]) -> Result<PathBuf> {
        let content: String = rows
            .iter()
            .map(|row| {
                let cells: Vec<String> = row.iter().map(i64::to_string).collect();
                cells.join(",") + "\n"
            })
            .collect();
        self.write(name, &content)
    }

    /// `content` repeated `times` times
    pub fn write_replicated(&self, name: &str, content: &str, times: usize) -> Result<PathBuf> {
        self.write(name, &content.repeat(times))
    }

    /// A harness configuration reading from this folder
    pub fn config(&self, datasets: Vec<DatasetEntry>) -> HarnessConfig {
        let mut config = HarnessConfig::new(self.dir.path(), datasets);
        config.seed = Some(0);
        config
    }
}
