//! Exact decimal arithmetic for column reductions
//!
//! Parsed cells are base-10 decimals (mantissa × 10^exponent). Summing them
//! as 128-bit decimals keeps addition associative and commutative, so the
//! merge order of partial results can never change a sum. Values that do not
//! fit fall back to `f64`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Largest power of ten representable in an i128
const MAX_POW10: u32 = 38;

fn pow10(n: u32) -> Option<i128> {
    if n > MAX_POW10 {
        None
    } else {
        10i128.checked_pow(n)
    }
}

/// A base-10 decimal `mantissa × 10^exponent`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Decimal {
    #[serde(with = "mantissa_string")]
    mantissa: i128,
    exponent: i32,
}

impl Decimal {
    pub const ZERO: Decimal = Decimal {
        mantissa: 0,
        exponent: 0,
    };

    pub fn new(mantissa: i128, exponent: i32) -> Self {
        Self { mantissa, exponent }
    }

    /// An integer value
    pub fn from_int(value: i128) -> Self {
        Self::new(value, 0)
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn exponent(&self) -> i32 {
        self.exponent
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    /// Strip trailing zeros from the mantissa; zero gets exponent 0
    pub fn normalized(self) -> Self {
        if self.mantissa == 0 {
            return Self::ZERO;
        }
        let mut mantissa = self.mantissa;
        let mut exponent = self.exponent;
        while mantissa % 10 == 0 {
            mantissa /= 10;
            exponent += 1;
        }
        Self { mantissa, exponent }
    }

    /// Rewrite both values at the smaller exponent, if the mantissas fit
    fn aligned(self, other: Self) -> Option<(i128, i128, i32)> {
        match self.exponent.cmp(&other.exponent) {
            Ordering::Equal => Some((self.mantissa, other.mantissa, self.exponent)),
            Ordering::Greater => {
                let scale = pow10((self.exponent - other.exponent) as u32)?;
                Some((
                    self.mantissa.checked_mul(scale)?,
                    other.mantissa,
                    other.exponent,
                ))
            }
            Ordering::Less => {
                let scale = pow10((other.exponent - self.exponent) as u32)?;
                Some((
                    self.mantissa,
                    other.mantissa.checked_mul(scale)?,
                    self.exponent,
                ))
            }
        }
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        if self.is_zero() {
            return Some(other);
        }
        if other.is_zero() {
            return Some(self);
        }
        let (a, b, exponent) = self.normalized().aligned(other.normalized())?;
        Some(Self::new(a.checked_add(b)?, exponent))
    }

    pub fn checked_mul_int(self, factor: i128) -> Option<Self> {
        Some(Self::new(self.mantissa.checked_mul(factor)?, self.exponent))
    }

    /// Compare values exactly when alignment fits, otherwise through f64
    pub fn cmp_value(&self, other: &Self) -> Ordering {
        match self.normalized().aligned(other.normalized()) {
            Some((a, b, _)) => a.cmp(&b),
            None => self.to_f64().total_cmp(&other.to_f64()),
        }
    }

    pub fn to_f64(&self) -> f64 {
        let mantissa = self.mantissa as f64;
        if self.exponent >= 0 {
            mantissa * 10f64.powi(self.exponent)
        } else {
            mantissa / 10f64.powi(-self.exponent)
        }
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        let a = self.normalized();
        let b = other.normalized();
        a.mantissa == b.mantissa && a.exponent == b.exponent
    }
}

impl Eq for Decimal {}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.normalized();
        if d.exponent >= 0 {
            if d.exponent <= 18 {
                write!(f, "{}{}", d.mantissa, "0".repeat(d.exponent as usize))
            } else {
                write!(f, "{}e{}", d.mantissa, d.exponent)
            }
        } else {
            let digits = d.mantissa.unsigned_abs().to_string();
            let sign = if d.mantissa < 0 { "-" } else { "" };
            let scale = (-d.exponent) as usize;
            if digits.len() > scale {
                let (int_part, frac_part) = digits.split_at(digits.len() - scale);
                write!(f, "{}{}.{}", sign, int_part, frac_part)
            } else {
                write!(f, "{}0.{}{}", sign, "0".repeat(scale - digits.len()), digits)
            }
        }
    }
}

/// A cell or partial value: exact decimal, or a double once exactness is lost
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Number {
    Exact(Decimal),
    Float(f64),
}

impl Number {
    pub fn zero() -> Self {
        Number::Exact(Decimal::ZERO)
    }

    pub fn to_f64(&self) -> f64 {
        match self {
            Number::Exact(d) => d.to_f64(),
            Number::Float(f) => *f,
        }
    }

    /// Add two numbers, staying exact while the mantissa fits
    pub fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Exact(a), Number::Exact(b)) => match a.checked_add(b) {
                Some(sum) => Number::Exact(sum),
                None => Number::Float(a.to_f64() + b.to_f64()),
            },
            (a, b) => Number::Float(a.to_f64() + b.to_f64()),
        }
    }

    pub fn cmp_value(&self, other: &Number) -> Ordering {
        match (self, other) {
            (Number::Exact(a), Number::Exact(b)) => a.cmp_value(b),
            (a, b) => a.to_f64().total_cmp(&b.to_f64()),
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Exact(a), Number::Exact(b)) => a == b,
            (Number::Float(a), Number::Float(b)) => a == b,
            _ => false,
        }
    }
}

mod mantissa_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
