//! Livecast CLI
//!
//! Command-line interface for interacting with the Livecast controller.

mod commands;
mod config;
mod id_resolver;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "livecast")]
#[command(about = "Livecast stream supervisor CLI", long_about = None)]
struct Cli {
    /// Controller URL
    #[arg(
        long,
        env = "LIVECAST_CONTROLLER_URL",
        default_value = "http://127.0.0.1:8090"
    )]
    controller_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        controller_url: cli.controller_url,
    };

    handle_command(cli.command, &config).await
}
