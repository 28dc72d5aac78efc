//! Consistency verification under the scaling law
//!
//! A dataset replicated `m` times must reduce to `m` times the base result
//! in every column. Exact results with integral multipliers are compared by
//! cross-multiplication, so no rounding is involved; everything else is
//! compared in `f64` against a relative tolerance.

use serde::Serialize;
use tracing::debug;

use crate::error::{HarnessError, InconsistencyDetail, Result};
use crate::reduce::{ColumnResultVector, Decimal, Scalar};

/// Largest multiplier that is still compared exactly
const MAX_EXACT_MULTIPLIER: f64 = 9_007_199_254_740_992.0;

/// Outcome of comparing one scaled vector against the base
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleRelation {
    pub base_dataset: String,
    pub scaled_dataset: String,
    /// Scaled multiplier over base multiplier
    pub multiplier: f64,
    pub columns: usize,
    pub exact_comparisons: usize,
    pub float_comparisons: usize,
    pub max_relative_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingReport {
    pub base_dataset: Option<String>,
    pub relations: Vec<ScaleRelation>,
}

impl ScalingReport {
    pub fn columns_checked(&self) -> usize {
        self.relations.iter().map(|r| r.columns).sum()
    }
}

/// Compares result vectors of differently scaled datasets
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier {
    tolerance: f64,
}

impl Verifier {
    /// `tolerance` is relative and applies to float comparisons only
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: if tolerance.is_finite() && tolerance > 0.0 {
                tolerance
            } else {
                0.0
            },
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Check every vector divided by its multiplier against the first one
    pub fn verify_scaling(&self, vectors: &[(ColumnResultVector, f64)]) -> Result<ScalingReport> {
        for (vector, multiplier) in vectors {
            if !multiplier.is_finite() || *multiplier <= 0.0 {
                return Err(HarnessError::config(format!(
                    "multiplier for '{}' must be a positive number, got {}",
                    vector.dataset, multiplier
                )));
            }
        }

        let Some(((base, base_multiplier), rest)) = vectors.split_first() else {
            return Ok(ScalingReport {
                base_dataset: None,
                relations: Vec::new(),
            });
        };

        let mut relations = Vec::with_capacity(rest.len());
        for (scaled, multiplier) in rest {
            relations.push(self.compare(base, *base_multiplier, scaled, *multiplier)?);
        }
        Ok(ScalingReport {
            base_dataset: Some(base.dataset.clone()),
            relations,
        })
    }

    fn compare(
        &self,
        base: &ColumnResultVector,
        base_multiplier: f64,
        scaled: &ColumnResultVector,
        multiplier: f64,
    ) -> Result<ScaleRelation> {
        if base.len() != scaled.len() {
            return Err(HarnessError::VectorLengthMismatch {
                dataset: scaled.dataset.clone(),
                expected: base.len(),
                actual: scaled.len(),
            });
        }

        let ratio = multiplier / base_multiplier;
        let mut relation = ScaleRelation {
            base_dataset: base.dataset.clone(),
            scaled_dataset: scaled.dataset.clone(),
            multiplier: ratio,
            columns: base.len(),
            exact_comparisons: 0,
            float_comparisons: 0,
            max_relative_error: 0.0,
        };

        for ((column, expected), observed) in base.iter().zip(&scaled.values) {
            let consistent = match (expected, observed) {
                (Scalar::Missing, Scalar::Missing) => true,
                (Scalar::Missing, _) | (_, Scalar::Missing) => false,
                (Scalar::Exact(b), Scalar::Exact(s)) => {
                    match cross_multiply(*b, base_multiplier, *s, multiplier) {
                        Some(equal) => {
                            relation.exact_comparisons += 1;
                            equal
                        }
                        None => self.compare_floats(
                            expected,
                            base_multiplier,
                            observed,
                            multiplier,
                            &mut relation,
                        ),
                    }
                }
                _ => self.compare_floats(
                    expected,
                    base_multiplier,
                    observed,
                    multiplier,
                    &mut relation,
                ),
            };

            if !consistent {
                return Err(HarnessError::Inconsistency(Box::new(InconsistencyDetail {
                    dataset: scaled.dataset.clone(),
                    column,
                    multiplier: ratio,
                    expected: scale(expected, base_multiplier, multiplier),
                    observed: *observed,
                })));
            }
        }

        debug!(
            "'{}' is {} x '{}' over {} columns ({} exact, {} float)",
            scaled.dataset,
            ratio,
            base.dataset,
            relation.columns,
            relation.exact_comparisons,
            relation.float_comparisons
        );
        Ok(relation)
    }

    fn compare_floats(
        &self,
        expected: &Scalar,
        base_multiplier: f64,
        observed: &Scalar,
        multiplier: f64,
        relation: &mut ScaleRelation,
    ) -> bool {
        relation.float_comparisons += 1;
        let (Some(b), Some(s)) = (expected.as_f64(), observed.as_f64()) else {
            return false;
        };
        let lhs = b / base_multiplier;
        let rhs = s / multiplier;
        if lhs == rhs {
            return true;
        }
        let magnitude = lhs.abs().max(rhs.abs());
        let error = (lhs - rhs).abs() / magnitude;
        if error.is_finite() {
            relation.max_relative_error = relation.max_relative_error.max(error);
        }
        error <= self.tolerance
    }
}

/// Shorthand for an exact-only check with the default verifier
pub fn verify_scaling(vectors: &[(ColumnResultVector, f64)]) -> Result<ScalingReport> {
    Verifier::default().verify_scaling(vectors)
}

fn integral(multiplier: f64) -> Option<i128> {
    (multiplier.fract() == 0.0 && multiplier >= 1.0 && multiplier <= MAX_EXACT_MULTIPLIER)
        .then_some(multiplier as i128)
}

/// `scaled / multiplier == base / base_multiplier`, without dividing;
/// `None` when it cannot be decided exactly
fn cross_multiply(
    base: Decimal,
    base_multiplier: f64,
    scaled: Decimal,
    multiplier: f64,
) -> Option<bool> {
    let lhs = scaled.checked_mul_int(integral(base_multiplier)?)?;
    let rhs = base.checked_mul_int(integral(multiplier)?)?;
    Some(lhs == rhs)
}

/// What the scaled column should hold, for error reports
fn scale(base: &Scalar, base_multiplier: f64, multiplier: f64) -> Scalar {
    match base {
        Scalar::Missing => Scalar::Missing,
        Scalar::Exact(d) if base_multiplier == 1.0 => integral(multiplier)
            .and_then(|m| d.checked_mul_int(m))
            .map(Scalar::Exact)
            .unwrap_or_else(|| Scalar::Float(d.to_f64() * multiplier)),
        other => Scalar::Float(other.as_f64().unwrap_or(f64::NAN) * multiplier / base_multiplier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::ReductionSpec;

    fn vector(dataset: &str, values: Vec<Scalar>) -> ColumnResultVector {
        ColumnResultVector::new(dataset, ReductionSpec::sum_each(), 0, values)
    }

    fn exact(values: &[i128]) -> Vec<Scalar> {
        values.iter().map(|v| Scalar::from_int(*v)).collect()
    }

    #[test]
    fn test_five_times_replicated_column() {
        let base = vector("cA", exact(&[179, 0, -4]));
        let scaled = vector("cB", exact(&[895, 0, -20]));
        let report = verify_scaling(&[(base, 1.0), (scaled, 5.0)]).unwrap();
        assert_eq!(report.base_dataset.as_deref(), Some("cA"));
        assert_eq!(report.relations[0].exact_comparisons, 3);
        assert_eq!(report.columns_checked(), 3);
    }

    #[test]
    fn test_mismatch_names_column_and_dataset() {
        let base = vector("cA", exact(&[179, 10]));
        let scaled = vector("cB", exact(&[895, 49]));
        let err = verify_scaling(&[(base, 1.0), (scaled, 5.0)]).unwrap_err();
        match err {
            HarnessError::Inconsistency(detail) => {
                assert_eq!(detail.dataset, "cB");
                assert_eq!(detail.column, 1);
                assert_eq!(detail.expected, Scalar::from_int(50));
                assert_eq!(detail.observed, Scalar::from_int(49));
                assert_eq!(detail.multiplier, 5.0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_base_multiplier_divides_out() {
        // 2x and 6x copies of the same data
        let a = vector("cA", exact(&[10, 14]));
        let b = vector("cB", exact(&[30, 42]));
        assert!(verify_scaling(&[(a, 2.0), (b, 6.0)]).is_ok());
    }

    #[test]
    fn test_decimal_results_compare_exactly() {
        let base = vector("cA", vec![Scalar::Exact(Decimal::new(1, -1))]);
        let scaled = vector("cB", vec![Scalar::Exact(Decimal::new(3, -1))]);
        assert!(verify_scaling(&[(base, 1.0), (scaled, 3.0)]).is_ok());
    }

    #[test]
    fn test_length_mismatch() {
        let base = vector("cA", exact(&[1, 2]));
        let scaled = vector("cB", exact(&[1]));
        assert!(matches!(
            verify_scaling(&[(base, 1.0), (scaled, 1.0)]),
            Err(HarnessError::VectorLengthMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_missing_only_matches_missing() {
        let base = vector("cA", vec![Scalar::Missing]);
        let same = vector("cB", vec![Scalar::Missing]);
        let filled = vector("cC", vec![Scalar::zero()]);
        assert!(verify_scaling(&[(base.clone(), 1.0), (same, 1.0)]).is_ok());
        assert!(verify_scaling(&[(base, 1.0), (filled, 1.0)]).is_err());
    }

    #[test]
    fn test_float_tolerance() {
        let base = vector("cA", vec![Scalar::Float(0.1 + 0.2)]);
        let scaled = vector("cB", vec![Scalar::Float(0.9)]);
        let vectors = [(base, 1.0), (scaled, 3.0)];
        assert!(verify_scaling(&vectors).is_err());
        let report = Verifier::new(1e-12).verify_scaling(&vectors).unwrap();
        assert_eq!(report.relations[0].float_comparisons, 1);
        assert!(report.relations[0].max_relative_error > 0.0);
    }

    #[test]
    fn test_fractional_multiplier_uses_floats() {
        let base = vector("cA", exact(&[10]));
        let scaled = vector("cB", exact(&[25]));
        let report = verify_scaling(&[(base, 1.0), (scaled, 2.5)]).unwrap();
        assert_eq!(report.relations[0].float_comparisons, 1);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(verify_scaling(&[]).unwrap().relations.is_empty());
        let single = vector("cA", exact(&[1]));
        assert!(verify_scaling(&[(single.clone(), 1.0)]).unwrap().relations.is_empty());
        assert!(verify_scaling(&[(single, 0.0)]).is_err());
    }
}
