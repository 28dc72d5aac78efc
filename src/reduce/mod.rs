//! Distributed column reductions
//!
//! Typed reduction specs, exact decimal arithmetic, mergeable partial states
//! and the engine that fans a reduction out across the cluster.

pub mod engine;
pub mod number;
pub mod partial;
pub mod results;
pub mod scalar;
pub mod spec;

pub use engine::ReductionEngine;
pub use number::{Decimal, Number};
pub use partial::{Combine, Partial};
pub use results::ColumnResultVector;
pub use scalar::Scalar;
pub use spec::{ColumnSelector, ReduceOp, ReductionSpec};
