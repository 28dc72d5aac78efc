//! Typed reduction specifications
//!
//! A reduction is an operator tag plus a column parameter, resolved by the
//! engine per column position. There is no expression language and no string
//! substitution.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reduction operator applied to one column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    /// Sum of all non-NA values
    Sum,
    /// Number of non-NA values
    Count,
    /// Smallest non-NA value
    Min,
    /// Largest non-NA value
    Max,
}

impl ReduceOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Count => "count",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
        }
    }

    /// Whether the result over an N× replicated dataset is N× the base result
    pub fn scales_linearly(&self) -> bool {
        matches!(self, ReduceOp::Sum | ReduceOp::Count)
    }

    /// Multiplier to verify this operator's results with
    pub fn effective_multiplier(&self, multiplier: f64) -> f64 {
        if self.scales_linearly() {
            multiplier
        } else {
            1.0
        }
    }
}

/// Which column a reduction reads at each position of a column range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SelectorRepr", into = "SelectorRepr")]
pub enum ColumnSelector {
    /// Position `c` reads column `c`
    Each,
    /// Every position reads the same column
    Fixed(usize),
}

impl ColumnSelector {
    pub fn resolve(&self, position: usize) -> usize {
        match self {
            ColumnSelector::Each => position,
            ColumnSelector::Fixed(column) => *column,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Index(usize),
    Keyword(String),
}

impl TryFrom<SelectorRepr> for ColumnSelector {
    type Error = String;

    fn try_from(repr: SelectorRepr) -> Result<Self, Self::Error> {
        match repr {
            SelectorRepr::Index(column) => Ok(ColumnSelector::Fixed(column)),
            SelectorRepr::Keyword(word) if word == "each" => Ok(ColumnSelector::Each),
            SelectorRepr::Keyword(word) => Err(format!(
                "column must be 'each' or a column index, got '{}'",
                word
            )),
        }
    }
}

impl From<ColumnSelector> for SelectorRepr {
    fn from(selector: ColumnSelector) -> Self {
        match selector {
            ColumnSelector::Each => SelectorRepr::Keyword("each".to_string()),
            ColumnSelector::Fixed(column) => SelectorRepr::Index(column),
        }
    }
}

/// A reduction evaluated independently per column position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionSpec {
    pub op: ReduceOp,
    #[serde(default = "default_selector")]
    pub column: ColumnSelector,
}

fn default_selector() -> ColumnSelector {
    ColumnSelector::Each
}

impl ReductionSpec {
    pub fn new(op: ReduceOp, column: ColumnSelector) -> Self {
        Self { op, column }
    }

    /// Sum of column `c` at every position `c`
    pub fn sum_each() -> Self {
        Self::new(ReduceOp::Sum, ColumnSelector::Each)
    }

    /// Sum of one fixed column at every position
    pub fn sum_of(column: usize) -> Self {
        Self::new(ReduceOp::Sum, ColumnSelector::Fixed(column))
    }
}

impl fmt::Display for ReductionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            ColumnSelector::Each => write!(f, "{}(col[c])", self.op.as_str()),
            ColumnSelector::Fixed(column) => write!(f, "{}(col[{}])", self.op.as_str(), column),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_resolution() {
        assert_eq!(ColumnSelector::Each.resolve(7), 7);
        assert_eq!(ColumnSelector::Fixed(21).resolve(7), 21);
    }

    #[test]
    fn test_spec_from_yaml() {
        let yaml = "- { op: sum, column: 21 }\n- { op: count, column: each }\n- { op: max }\n";
        let specs: Vec<ReductionSpec> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(specs[0], ReductionSpec::sum_of(21));
        assert_eq!(specs[1], ReductionSpec::new(ReduceOp::Count, ColumnSelector::Each));
        assert_eq!(specs[2].column, ColumnSelector::Each);
    }

    #[test]
    fn test_invalid_selector_keyword() {
        let result: Result<ReductionSpec, _> = serde_yaml::from_str("{ op: sum, column: all }");
        assert!(result.is_err());
    }

    #[test]
    fn test_effective_multiplier() {
        assert_eq!(ReduceOp::Sum.effective_multiplier(5.0), 5.0);
        assert_eq!(ReduceOp::Max.effective_multiplier(5.0), 1.0);
        assert_eq!(ReductionSpec::sum_of(21).to_string(), "sum(col[21])");
    }
}
