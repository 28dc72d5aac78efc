use serde::{Serialize, Serializer};
use std::fmt;

use super::number::{Decimal, Number};

/// Final per-column reduction result
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// Exact decimal result
    Exact(Decimal),
    /// Result that passed through floating point
    Float(f64),
    /// No values to reduce (min/max of an all-NA column)
    Missing,
}

impl Scalar {
    pub fn zero() -> Self {
        Scalar::Exact(Decimal::ZERO)
    }

    pub fn from_int(value: i128) -> Self {
        Scalar::Exact(Decimal::from_int(value))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Scalar::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Exact(d) => Some(d.to_f64()),
            Scalar::Float(f) => Some(*f),
            Scalar::Missing => None,
        }
    }
}

impl From<Number> for Scalar {
    fn from(number: Number) -> Self {
        match number {
            Number::Exact(d) => Scalar::Exact(d),
            Number::Float(f) => Scalar::Float(f),
        }
    }
}

impl From<Option<Number>> for Scalar {
    fn from(number: Option<Number>) -> Self {
        number.map(Scalar::from).unwrap_or(Scalar::Missing)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Exact(d) => write!(f, "{}", d),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Missing => write!(f, "NA"),
        }
    }
}

// Reports carry plain JSON numbers; `null` marks a missing value
impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_f64() {
            Some(value) if value.is_finite() => serializer.serialize_f64(value),
            _ => serializer.serialize_none(),
        }
    }
}
