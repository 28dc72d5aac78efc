//! Synthetic datasets with known column sums
//!
//! `write_dataset` produces a headerless CSV of integer and two-decimal
//! columns and returns the exact sum of every column. `replicate` writes a
//! source file several times over, which is how scaled datasets are made.

use csv::WriterBuilder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::error::{HarnessError, Result};
use crate::import::ParseSetup;
use crate::reduce::Decimal;

/// Shape of a generated dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetShape {
    pub rows: usize,
    pub columns: usize,
    pub seed: u64,
    /// Leave every n-th cell of the last column empty
    pub na_every: Option<usize>,
}

impl DatasetShape {
    pub fn new(rows: usize, columns: usize, seed: u64) -> Self {
        Self {
            rows,
            columns,
            seed,
            na_every: None,
        }
    }

    pub fn with_na_every(mut self, every: usize) -> Self {
        self.na_every = (every > 0).then_some(every);
        self
    }
}

/// Write a random dataset to `path`; returns the sum of each column
pub fn write_dataset(path: &Path, shape: DatasetShape) -> Result<Vec<Decimal>> {
    let file = File::create(path).map_err(|e| HarnessError::io(path, e))?;
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    let mut rng = StdRng::seed_from_u64(shape.seed);
    let mut sums = vec![Decimal::ZERO; shape.columns];
    let mut record = Vec::with_capacity(shape.columns);

    for row in 0..shape.rows {
        record.clear();
        for (column, sum) in sums.iter_mut().enumerate() {
            let blank = column + 1 == shape.columns
                && shape.na_every.is_some_and(|every| row % every == 0);
            if blank {
                record.push(String::new());
                continue;
            }
            // Even columns hold integers, odd columns hundredths
            let value = if column % 2 == 0 {
                Decimal::from_int(rng.random_range(-1_000..=1_000))
            } else {
                Decimal::new(rng.random_range(-50_000..=50_000), -2)
            };
            *sum = sum
                .checked_add(value)
                .ok_or_else(|| HarnessError::internal("generated column sum overflowed"))?;
            record.push(value.to_string());
        }
        writer
            .write_record(&record)
            .map_err(|e| HarnessError::io(path, e.into()))?;
    }
    writer.flush().map_err(|e| HarnessError::io(path, e))?;

    info!(
        "Wrote {} rows x {} columns to {} (seed {})",
        shape.rows,
        shape.columns,
        path.display(),
        shape.seed
    );
    Ok(sums)
}

/// Write `times` copies of `source` to `dest`, keeping a header only once
///
/// Returns the number of data lines written.
pub fn replicate(source: &Path, dest: &Path, times: usize) -> Result<u64> {
    if times == 0 {
        return Err(HarnessError::config("replication factor must be at least 1"));
    }
    let mut out = BufWriter::new(File::create(dest).map_err(|e| HarnessError::io(dest, e))?);
    let mut lines = 0u64;

    for copy in 0..times {
        let reader = BufReader::new(File::open(source).map_err(|e| HarnessError::io(source, e))?);
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| HarnessError::io(source, e))?;
            if index == 0 && ParseSetup::sniff(&line, None, None, 1).has_header {
                if copy == 0 {
                    writeln!(out, "{}", line).map_err(|e| HarnessError::io(dest, e))?;
                }
                continue;
            }
            writeln!(out, "{}", line).map_err(|e| HarnessError::io(dest, e))?;
            lines += 1;
        }
    }
    out.flush().map_err(|e| HarnessError::io(dest, e))?;

    info!(
        "Replicated {} x{} into {} ({} lines)",
        source.display(),
        times,
        dest.display(),
        lines
    );
    Ok(lines)
}
