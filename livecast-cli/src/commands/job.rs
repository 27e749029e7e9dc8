//! Job command handlers
//!
//! Handles all job-related CLI commands including creation, lifecycle
//! control and encoder log access.

use anyhow::{Result, anyhow};
use clap::Subcommand;
use colored::*;
use livecast_client::ControllerClient;
use livecast_core::domain::broadcast::Privacy;
use livecast_core::domain::job::JobStatus;
use livecast_core::domain::quality::Quality;
use livecast_core::domain::schedule::ScheduledStart;
use livecast_core::dto::job::{BroadcastRequest, CreateJob, JobSummary};
use std::path::PathBuf;

use crate::config::Config;
use crate::id_resolver::resolve_job_id;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List all jobs
    List,
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Create a job
    Create {
        /// Media file, relative to the controller's media directory or absolute
        source: PathBuf,

        /// Ingest stream key (omit when provisioning a broadcast)
        #[arg(short, long)]
        key: Option<String>,

        /// Display title
        #[arg(short, long)]
        title: Option<String>,

        /// Channel whose credentials are used for a provisioned broadcast
        #[arg(short, long)]
        channel: Option<String>,

        /// Quality profile (minimal, very_low, low, medium, high or 240p..1080p)
        #[arg(short, long)]
        quality: Option<Quality>,

        /// Swap width and height for portrait output
        #[arg(long)]
        vertical: bool,

        /// Start time as HH:MM in the controller's schedule timezone, or "now"
        #[arg(short, long)]
        at: Option<ScheduledStart>,

        /// Provision a remote broadcast with this title instead of using --key
        #[arg(long)]
        broadcast: Option<String>,

        /// Description of the provisioned broadcast
        #[arg(long, default_value = "", requires = "broadcast")]
        description: String,

        /// Privacy of the provisioned broadcast (public, unlisted, private)
        #[arg(long, value_parser = parse_privacy, default_value = "public", requires = "broadcast")]
        privacy: Privacy,
    },
    /// Start a waiting job now
    Start {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Stop a live job
    Stop {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Queue a finished job again
    Retry {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Delete a job that is not live
    Remove {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Show the tail of a job's encoder log
    Log {
        /// Job ID or unambiguous prefix
        id: String,

        /// Number of lines
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
}

/// Handle job commands
///
/// Routes job subcommands to their respective handlers.
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = ControllerClient::new(&config.controller_url);

    match command {
        JobCommands::List => list_jobs(&client).await,
        JobCommands::Get { id } => get_job(&client, &id).await,
        JobCommands::Create {
            source,
            key,
            title,
            channel,
            quality,
            vertical,
            at,
            broadcast,
            description,
            privacy,
        } => {
            let req = CreateJob {
                title,
                channel,
                source,
                destination_key: key,
                quality,
                vertical,
                scheduled_start: at,
                broadcast: broadcast.map(|title| BroadcastRequest {
                    title,
                    description,
                    privacy,
                }),
            };
            create_job(&client, req).await
        }
        JobCommands::Start { id } => {
            let uuid = resolve_job_id(&client, &id).await?;
            let job = client.start_job(uuid).await?;
            println!("{} Job {} is {}", "✓".green(), job.id, colorize_status(&job.status));
            Ok(())
        }
        JobCommands::Stop { id } => {
            let uuid = resolve_job_id(&client, &id).await?;
            let job = client.stop_job(uuid).await?;
            println!("{} Job {} is {}", "✓".green(), job.id, colorize_status(&job.status));
            Ok(())
        }
        JobCommands::Retry { id } => {
            let uuid = resolve_job_id(&client, &id).await?;
            let job = client.retry_job(uuid).await?;
            println!("{} Job {} queued again", "✓".green(), job.id);
            Ok(())
        }
        JobCommands::Remove { id } => {
            let uuid = resolve_job_id(&client, &id).await?;
            client.delete_job(uuid).await?;
            println!("{} Job {} removed", "✓".green(), uuid);
            Ok(())
        }
        JobCommands::Log { id, lines } => get_job_log(&client, &id, lines).await,
    }
}

/// List all jobs
async fn list_jobs(client: &ControllerClient) -> Result<()> {
    let jobs = client.list_jobs().await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

/// Get and display a single job
async fn get_job(client: &ControllerClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, id).await?;

    let job = client.get_job(uuid).await?;

    print_job_details(&job);

    Ok(())
}

async fn create_job(client: &ControllerClient, req: CreateJob) -> Result<()> {
    if req.destination_key.is_none() && req.broadcast.is_none() {
        return Err(anyhow!("Either --key or --broadcast is required"));
    }

    let job = client.create_job(req).await?;

    println!("{} Created job {}", "✓".green(), job.id.to_string().cyan());
    print_job_details(&job);

    Ok(())
}

/// Get and display the encoder log tail
async fn get_job_log(client: &ControllerClient, id: &str, lines: usize) -> Result<()> {
    let uuid = resolve_job_id(client, id).await?;

    let tail = client.get_job_log(uuid, lines).await?;

    if tail.lines.is_empty() {
        println!("{}", "No encoder output for this job.".yellow());
    } else {
        println!("{}", format!("Encoder log for job {}:", uuid).bold());
        println!("{}", "─".repeat(80).dimmed());
        for line in &tail.lines {
            println!("{}", line);
        }
        println!("{}", "─".repeat(80).dimmed());
    }

    Ok(())
}

/// Print a one-block job summary
fn print_job_summary(job: &JobSummary) {
    let title = if job.title.is_empty() {
        job.source.display().to_string()
    } else {
        job.title.clone()
    };

    println!("  {} {} {}", "▸".cyan(), title.bold(), job.id.to_string().dimmed());
    println!("    Status:   {}", colorize_status(&job.status));
    println!(
        "    Start:    {}  Quality: {}{}",
        job.scheduled_start,
        job.quality,
        if job.vertical { " (vertical)" } else { "" }
    );
    println!("    Channel:  {}", job.channel.dimmed());
    if let Some(note) = &job.annotation {
        println!("    Note:     {}", note.yellow());
    }
    println!();
}

/// Print detailed job information
fn print_job_details(job: &JobSummary) {
    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.id.to_string().cyan());
    if !job.title.is_empty() {
        println!("  Title:       {}", job.title);
    }
    println!("  Status:      {}", colorize_status(&job.status));
    println!("  Source:      {}", job.source.display());
    println!("  Channel:     {}", job.channel);
    println!("  Stream key:  {}", job.destination_key.dimmed());
    println!(
        "  Quality:     {}{}",
        job.quality,
        if job.vertical { " (vertical)" } else { "" }
    );
    println!("  Start:       {}", job.scheduled_start);
    println!(
        "  Created:     {}",
        job.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(started) = job.started_at {
        println!("  Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(ended) = job.ended_at {
        println!("  Ended:       {}", ended.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = job.started_at {
            let seconds = ended.signed_duration_since(started).num_seconds();
            println!("  Duration:    {}s", seconds);
        }
    }

    if let Some(pid) = job.process_handle {
        println!("  Encoder PID: {}", pid);
    }

    if let Some(broadcast) = &job.remote_broadcast_id {
        println!("  Broadcast:   {}", broadcast);
    }

    if let Some(note) = &job.annotation {
        println!("\n{}", "Note:".bold());
        println!("{}", note.yellow());
    }
}

/// Colorize job status for display
fn colorize_status(status: &JobStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        JobStatus::Waiting => status_str.yellow(),
        JobStatus::Live => status_str.cyan(),
        JobStatus::Completed => status_str.green(),
        JobStatus::Stopped => status_str.dimmed(),
        JobStatus::Disconnected => status_str.magenta(),
        JobStatus::Error { .. } => status_str.red(),
    }
}

fn parse_privacy(input: &str) -> Result<Privacy, String> {
    match input.trim().to_ascii_lowercase().as_str() {
        "public" => Ok(Privacy::Public),
        "unlisted" => Ok(Privacy::Unlisted),
        "private" => Ok(Privacy::Private),
        other => Err(format!(
            "unknown privacy '{}', expected public, unlisted or private",
            other
        )),
    }
}
