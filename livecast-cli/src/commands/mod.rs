//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod system;

pub use job::JobCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Job management
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Show job counts overall and per channel
    Status,
    /// List media files available as job sources
    Videos,
    /// List channels with platform credentials
    Channels,
    /// Reconcile running encoders and start due jobs now
    Activate,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Status => system::show_status(config).await,
        Commands::Videos => system::list_videos(config).await,
        Commands::Channels => system::list_channels(config).await,
        Commands::Activate => system::activate(config).await,
    }
}
