use clap::Parser;

use sumcheck::app::{handle_fatal_error, init_logging, AppConfig};
use sumcheck::cli::{execute_command, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = AppConfig::new(cli.verbose);
    init_logging(&config);

    if let Err(e) = execute_command(cli.command, cli.verbose).await {
        handle_fatal_error(e, cli.verbose);
    }
}
