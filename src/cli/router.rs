//! Command routing and execution

use anyhow::Result;

use crate::cli::args::Commands;
use crate::cli::commands::{
    run_generate_command, run_verify_command, run_worker_command, GenerateParams,
};

/// Execute a CLI command based on the parsed arguments
pub async fn execute_command(command: Commands, _verbose: u8) -> Result<()> {
    match command {
        Commands::Verify {
            config,
            report,
            nodes,
            seed,
        } => run_verify_command(config, report, nodes, seed).await,
        Commands::Worker { listen, name } => run_worker_command(listen, name).await,
        Commands::Generate {
            output,
            rows,
            columns,
            seed,
            na_every,
            replicate,
        } => run_generate_command(GenerateParams {
            output,
            rows,
            columns,
            seed,
            na_every,
            replicate,
        }),
    }
}
