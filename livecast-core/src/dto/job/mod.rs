//! Job DTOs for communication between the controller and its clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::broadcast::Privacy;
use crate::domain::job::{Job, JobStatus};
use crate::domain::quality::Quality;
use crate::domain::schedule::ScheduledStart;

/// Request to create a new job
///
/// Either `destination_key` or `broadcast` must be given. With `broadcast`,
/// the controller provisions a remote broadcast and uses its ingest key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    pub source: PathBuf,
    #[serde(default)]
    pub destination_key: Option<String>,
    #[serde(default)]
    pub quality: Option<Quality>,
    #[serde(default)]
    pub vertical: bool,
    #[serde(default)]
    pub scheduled_start: Option<ScheduledStart>,
    #[serde(default)]
    pub broadcast: Option<BroadcastRequest>,
}

/// Remote broadcast to provision alongside a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub privacy: Privacy,
}

/// Job view returned by the API
///
/// Identical to the persisted record except that the ingest key is redacted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub title: String,
    pub channel: String,
    pub source: PathBuf,
    pub destination_key: String,
    pub quality: Quality,
    pub vertical: bool,
    pub scheduled_start: ScheduledStart,
    pub status: JobStatus,
    pub process_handle: Option<u32>,
    pub remote_broadcast_id: Option<String>,
    pub annotation: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            title: job.title,
            channel: job.channel,
            source: job.source,
            destination_key: job.destination_key.redacted(),
            quality: job.quality,
            vertical: job.vertical,
            scheduled_start: job.scheduled_start,
            status: job.status,
            process_handle: job.process_handle,
            remote_broadcast_id: job.remote_broadcast_id,
            annotation: job.annotation,
            created_at: job.created_at,
            started_at: job.started_at,
            ended_at: job.ended_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_redacts_key() {
        let job = Job::new("demo.mp4", "abcd1234");
        let summary: JobSummary = job.clone().into();

        assert_eq!(summary.id, job.id);
        assert_eq!(summary.destination_key, "abcd****");
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("abcd1234"));
    }

    #[test]
    fn test_create_job_minimal_payload() {
        let req: CreateJob =
            serde_json::from_str(r#"{ "source": "demo.mp4", "destination_key": "k" }"#).unwrap();
        assert!(req.quality.is_none());
        assert!(req.scheduled_start.is_none());
        assert!(!req.vertical);
        assert!(req.broadcast.is_none());
    }
}
