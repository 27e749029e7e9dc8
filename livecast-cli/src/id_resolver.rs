//! ID resolver module
//!
//! Lets users type a short, unambiguous prefix of a job id instead of the
//! full UUID.

use anyhow::{Context, Result, anyhow};
use livecast_client::ControllerClient;
use uuid::Uuid;

/// Resolve a job ID or prefix to a full UUID
///
/// A full UUID is returned as is without contacting the controller.
/// Otherwise all jobs are fetched and exactly one must match the prefix.
///
/// # Errors
/// Returns an error if:
/// - No job matches the prefix
/// - Multiple jobs match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_job_id(client: &ControllerClient, input: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(input) {
        return Ok(uuid);
    }

    let jobs = client
        .list_jobs()
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    match_prefix(jobs.iter().map(|j| j.id), input)
}

fn match_prefix(ids: impl Iterator<Item = Uuid>, input: &str) -> Result<Uuid> {
    let prefix = input.trim().to_lowercase();
    if prefix.is_empty() {
        return Err(anyhow!("Job ID cannot be empty"));
    }

    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No job found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
