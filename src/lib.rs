//! # sumcheck
//!
//! A verification harness for distributed column reductions. It imports a
//! dataset and scaled replicas of it across a cluster of worker nodes,
//! reduces every column on every node, and checks that the results obey the
//! scaling law: a dataset replicated `m` times sums to `m` times the base.
//!
//! ## Usage
//!
//! ```bash
//! sumcheck verify --config harness.yml [--report run.json]
//! sumcheck worker --listen 0.0.0.0:54321
//! sumcheck generate --output data.csv --rows 1000 --columns 8 --replicate 5
//! ```
//!
//! ## Modules
//!
//! - `app` - Logging setup and fatal error handling for the binary
//! - `cli` - Argument structures and subcommand handlers
//! - `cluster` - Cluster handle, worker nodes, local and TCP transports
//! - `config` - Harness configuration, hosts files and environment overrides
//! - `datagen` - Synthetic datasets with known sums, replication
//! - `error` - Error type with stable codes
//! - `harness` - Sessions and the end-to-end verification runner
//! - `health` - Structured node events and anomaly detection
//! - `import` - Partitioned parsing of text sources into shards
//! - `keys` - Session-owned dataset and result key registry
//! - `reduce` - Typed reductions, exact decimals and the reduction engine
//! - `store` - Node-local compressed column chunks
//! - `testing` - Scripted clusters and dataset fixtures
//! - `verify` - Scaling-law consistency checks
pub mod app;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod datagen;
pub mod error;
pub mod harness;
pub mod health;
pub mod import;
pub mod keys;
pub mod reduce;
pub mod store;
pub mod verify;

pub mod testing;

pub use error::{HarnessError, Result};
