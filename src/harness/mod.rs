//! End-to-end verification runs
//!
//! A run provisions a cluster, opens a session on it and walks the
//! configured datasets in order. Each cycle imports one dataset, reduces it
//! with every configured expression, checks the results against the first
//! dataset under the scaling law and then checks cluster health.

pub mod report;
pub mod runner;
pub mod session;

pub use report::{DatasetReport, ExpressionReport, Outcome, RunReport};
pub use runner::HarnessRunner;
pub use session::Session;
