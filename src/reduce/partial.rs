//! Partial reduction states and their combine operation
//!
//! Every node reduces the chunks it holds to a `Partial`; the coordinator
//! folds partials from all nodes with `Combine::combine`. The operation is
//! associative and commutative for every operator, and exact for decimal data.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::number::{Decimal, Number};
use super::scalar::Scalar;
use super::spec::ReduceOp;

/// Associative combination of two values of the same type
pub trait Combine: Sized {
    fn combine(self, other: Self) -> Self;

    /// Fold an iterator onto a starting value
    fn combine_all<I>(self, others: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        others.into_iter().fold(self, Combine::combine)
    }
}

/// Intermediate state of one reduction over a subset of a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Partial {
    Sum { value: Number },
    Count { count: u64 },
    Min { value: Option<Number> },
    Max { value: Option<Number> },
}

impl Partial {
    /// Neutral element for `op`
    pub fn identity(op: ReduceOp) -> Self {
        match op {
            ReduceOp::Sum => Partial::Sum {
                value: Number::zero(),
            },
            ReduceOp::Count => Partial::Count { count: 0 },
            ReduceOp::Min => Partial::Min { value: None },
            ReduceOp::Max => Partial::Max { value: None },
        }
    }

    pub fn op(&self) -> ReduceOp {
        match self {
            Partial::Sum { .. } => ReduceOp::Sum,
            Partial::Count { .. } => ReduceOp::Count,
            Partial::Min { .. } => ReduceOp::Min,
            Partial::Max { .. } => ReduceOp::Max,
        }
    }

    /// Fold a single non-NA value into this partial
    pub fn observe(&mut self, number: Number) {
        match self {
            Partial::Sum { value } => *value = value.add(number),
            Partial::Count { count } => *count += 1,
            Partial::Min { value } => *value = pick(*value, Some(number), Ordering::Less),
            Partial::Max { value } => *value = pick(*value, Some(number), Ordering::Greater),
        }
    }

    pub fn finalize(self) -> Scalar {
        match self {
            Partial::Sum { value } => Scalar::from(value),
            Partial::Count { count } => Scalar::Exact(Decimal::from_int(count as i128)),
            Partial::Min { value } | Partial::Max { value } => Scalar::from(value),
        }
    }
}

/// Keep whichever side compares as `wanted` against the other
fn pick(a: Option<Number>, b: Option<Number>, wanted: Ordering) -> Option<Number> {
    match (a, b) {
        (Some(x), Some(y)) => {
            if y.cmp_value(&x) == wanted {
                Some(y)
            } else {
                Some(x)
            }
        }
        (x, None) => x,
        (None, y) => y,
    }
}

impl Combine for Partial {
    fn combine(self, other: Self) -> Self {
        use Partial::*;

        match (self, other) {
            (Sum { value: a }, Sum { value: b }) => Sum { value: a.add(b) },
            (Count { count: a }, Count { count: b }) => Count {
                count: a.saturating_add(b),
            },
            (Min { value: a }, Min { value: b }) => Min {
                value: pick(a, b, Ordering::Less),
            },
            (Max { value: a }, Max { value: b }) => Max {
                value: pick(a, b, Ordering::Greater),
            },
            // Callers check operators before combining
            (a, b) => panic!(
                "Cannot combine partials of different operators: {} and {}",
                a.op().as_str(),
                b.op().as_str()
            ),
        }
    }
}
