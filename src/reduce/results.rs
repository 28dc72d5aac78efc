use serde::Serialize;

use super::scalar::Scalar;
use super::spec::ReductionSpec;

/// Ordered per-column results of one reduction over one dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnResultVector {
    pub dataset: String,
    pub spec: ReductionSpec,
    pub min_col: usize,
    pub values: Vec<Scalar>,
}

impl ColumnResultVector {
    pub fn new(
        dataset: impl Into<String>,
        spec: ReductionSpec,
        min_col: usize,
        values: Vec<Scalar>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            spec,
            min_col,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// One past the last column position covered
    pub fn max_col(&self) -> usize {
        self.min_col + self.values.len()
    }

    /// Result for an absolute column position
    pub fn get(&self, column: usize) -> Option<&Scalar> {
        column
            .checked_sub(self.min_col)
            .and_then(|offset| self.values.get(offset))
    }

    /// Iterate over `(column, value)` pairs in ascending column order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Scalar)> {
        self.values
            .iter()
            .enumerate()
            .map(move |(offset, value)| (self.min_col + offset, value))
    }
}
