//! Verify command implementation

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::config::load_config;
use crate::harness::HarnessRunner;

/// Load a harness configuration and run it to completion
pub async fn run_verify_command(
    config_path: PathBuf,
    report: Option<PathBuf>,
    nodes: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    let mut config = load_config(&config_path)?;
    if let Some(nodes) = nodes {
        config.cluster.nodes = nodes;
    }
    if seed.is_some() {
        config.seed = seed;
    }
    config
        .validate()
        .with_context(|| format!("Invalid overrides for {}", config_path.display()))?;

    let mut runner = HarnessRunner::new(config);
    if let Some(path) = report {
        runner = runner.with_report(path);
    }
    let report = runner.run().await?;
    println!("{}", report.summary());
    Ok(())
}
