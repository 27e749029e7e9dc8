//! Controller-wide command handlers

use anyhow::Result;
use colored::*;
use livecast_client::ControllerClient;
use livecast_core::dto::status::StatusCounts;

use crate::config::Config;

/// Show job counts overall and per channel
pub async fn show_status(config: &Config) -> Result<()> {
    let client = ControllerClient::new(&config.controller_url);
    let summary = client.status().await?;

    println!(
        "{} {}",
        "Controller clock:".bold(),
        summary.clock.cyan()
    );
    println!(
        "{} cpu {:.1}%  memory {} / {} ({:.1}%)",
        "Host:".bold(),
        summary.host.cpu_percent,
        format_size(summary.host.memory_used_bytes),
        format_size(summary.host.memory_total_bytes),
        summary.host.memory_percent()
    );
    println!();
    print_counts("All jobs", &summary.counts);

    for (channel, counts) in &summary.channels {
        print_counts(channel, counts);
    }

    Ok(())
}

/// List media files
pub async fn list_videos(config: &Config) -> Result<()> {
    let client = ControllerClient::new(&config.controller_url);
    let videos = client.list_videos().await?;

    if videos.is_empty() {
        println!("{}", "No media files found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} media file(s):", videos.len()).bold());
    for video in videos {
        println!(
            "  {} {} {}",
            "▸".cyan(),
            video.name,
            format_size(video.size_bytes).dimmed()
        );
    }

    Ok(())
}

/// List channels with credentials
pub async fn list_channels(config: &Config) -> Result<()> {
    let client = ControllerClient::new(&config.controller_url);
    let list = client.list_channels().await?;

    println!("{}", "Channels:".bold());
    for channel in list.channels {
        println!("  {} {}", "▸".cyan(), channel);
    }

    Ok(())
}

/// Trigger an activation and print its report
pub async fn activate(config: &Config) -> Result<()> {
    let client = ControllerClient::new(&config.controller_url);
    let report = client.activate().await?;

    println!("{} Activation finished", "✓".green());
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn print_counts(label: &str, counts: &StatusCounts) {
    println!("{} ({})", label.bold(), counts.total);
    println!(
        "  {} waiting  {} live  {} completed  {} stopped  {} disconnected  {} error",
        counts.waiting.to_string().yellow(),
        counts.live.to_string().cyan(),
        counts.completed.to_string().green(),
        counts.stopped,
        counts.disconnected.to_string().magenta(),
        counts.errored.to_string().red()
    );
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }
}
