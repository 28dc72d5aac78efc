//! CLI argument structures

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Verify that distributed column reductions obey the scaling law
#[derive(Parser)]
#[command(name = "sumcheck")]
#[command(about = "sumcheck - verify distributed column reductions across scaled datasets", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a verification from a configuration file
    Verify {
        /// Harness configuration (YAML, JSON or TOML)
        #[arg(short = 'c', long)]
        config: PathBuf,

        /// Write a JSON run report here
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,

        /// Override the number of local nodes
        #[arg(short = 'n', long)]
        nodes: Option<usize>,

        /// Override the sampling seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Serve one worker node over TCP
    Worker {
        /// Address to listen on
        #[arg(short = 'l', long, default_value = "127.0.0.1:54321")]
        listen: SocketAddr,

        /// Node name reported to the coordinator (defaults to the host name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Write a random dataset with known column sums
    Generate {
        /// Output file
        #[arg(short = 'o', long)]
        output: PathBuf,

        #[arg(long, default_value = "1000")]
        rows: usize,

        #[arg(long, default_value = "8")]
        columns: usize,

        #[arg(long, default_value = "0")]
        seed: u64,

        /// Leave every n-th cell of the last column empty
        #[arg(long, value_name = "N")]
        na_every: Option<usize>,

        /// Also write a copy replicated N times next to the output
        #[arg(long, value_name = "N")]
        replicate: Option<usize>,
    },
}
