//! Job Service
//!
//! Operations behind the HTTP API: job CRUD, start/stop/retry, and the
//! read-only views (log tail, status summary, media listing).

use chrono::FixedOffset;
use livecast_core::domain::job::{DEFAULT_CHANNEL, Job, JobStatus};
use livecast_core::dto::job::CreateJob;
use livecast_core::dto::log::LogTail;
use livecast_core::dto::media::{ChannelList, VideoFile};
use livecast_core::dto::status::{StatusCounts, StatusSummary};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::encoder::{self, LOG_TAIL_BYTES};
use crate::platform::PlatformError;
use crate::process;
use crate::repository::registry::{JobRegistry, RegistryError};
use crate::repository::tracking::TrackingStore;
use crate::service::supervisor::{Supervisor, SupervisorError};

/// Extensions listed by [`JobService::list_videos`]
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "flv", "wmv", "webm"];

/// Upper bound for a log tail request
pub const MAX_LOG_LINES: usize = 1000;

/// Service error type
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    ValidationError(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("job {0} is live, stop it first")]
    JobStillLive(Uuid),

    #[error("source file {} does not exist", .0.display())]
    SourceNotFound(PathBuf),

    #[error("failed to spawn encoder: {0}")]
    SpawnFailure(String),

    #[error("broadcast provisioning failed: {0}")]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Internal(String),
}

impl From<SupervisorError> for JobError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::NotFound(id) => JobError::NotFound(id),
            SupervisorError::SourceNotFound(path) => JobError::SourceNotFound(path),
            SupervisorError::SpawnFailure(msg) => JobError::SpawnFailure(msg),
            SupervisorError::InvalidState { id, status } => {
                JobError::InvalidState(format!("job {} is {}", id, status))
            }
            SupervisorError::Signal(e) => JobError::Internal(e.to_string()),
            SupervisorError::Registry(e) => JobError::Registry(e),
        }
    }
}

pub struct JobService {
    registry: Arc<JobRegistry>,
    tracking: Arc<TrackingStore>,
    supervisor: Arc<Supervisor>,
    media_dir: PathBuf,
    schedule_offset: Option<FixedOffset>,
}

impl JobService {
    pub fn new(
        registry: Arc<JobRegistry>,
        tracking: Arc<TrackingStore>,
        supervisor: Arc<Supervisor>,
        media_dir: PathBuf,
        schedule_offset: Option<FixedOffset>,
    ) -> Self {
        Self {
            registry,
            tracking,
            supervisor,
            media_dir,
            schedule_offset,
        }
    }

    pub async fn list(&self) -> Result<Vec<Job>, JobError> {
        Ok(self.registry.load().await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Job, JobError> {
        self.registry.get(id).await?.ok_or(JobError::NotFound(id))
    }

    /// Creates a waiting job
    ///
    /// A relative source is resolved against the media directory. With a
    /// `broadcast` block a remote broadcast is provisioned first and its
    /// ingest key becomes the job's destination key.
    pub async fn create(&self, req: CreateJob) -> Result<Job, JobError> {
        validate_create(&req)?;

        let source = if req.source.is_absolute() {
            req.source.clone()
        } else {
            self.media_dir.join(&req.source)
        };
        if !source.is_file() {
            return Err(JobError::ValidationError(format!(
                "source file {} does not exist",
                source.display()
            )));
        }

        let channel = req
            .channel
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
        let scheduled_start = req.scheduled_start.unwrap_or_default();

        let (key, broadcast_id) = match &req.broadcast {
            Some(broadcast) => {
                let announce_at =
                    scheduled_start.next_occurrence(config::schedule_now(self.schedule_offset));
                let provisioned = self
                    .supervisor
                    .broadcasts()
                    .provision(&channel, broadcast, announce_at)
                    .await?;
                (provisioned.stream_key, Some(provisioned.broadcast_id))
            }
            None => (
                req.destination_key
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string(),
                None,
            ),
        };

        let mut job = Job::new(source, key);
        job.title = req
            .title
            .clone()
            .or_else(|| req.broadcast.as_ref().map(|b| b.title.clone()))
            .unwrap_or_default();
        job.channel = channel;
        job.quality = req.quality.unwrap_or_default();
        job.vertical = req.vertical;
        job.scheduled_start = scheduled_start;
        job.remote_broadcast_id = broadcast_id;

        let created = job.clone();
        self.registry
            .update(|jobs| {
                jobs.push(job);
                Ok::<_, RegistryError>(())
            })
            .await?;

        tracing::info!(
            "Job created: {} ({}, {}, start {})",
            created.id,
            created.source.display(),
            created.quality,
            created.scheduled_start
        );

        Ok(created)
    }

    pub async fn start(&self, id: Uuid) -> Result<Job, JobError> {
        Ok(self.supervisor.start(id).await?)
    }

    pub async fn stop(&self, id: Uuid) -> Result<Job, JobError> {
        Ok(self.supervisor.stop(id).await?)
    }

    /// Deletes a job that is not live, along with its artifacts
    pub async fn remove(&self, id: Uuid) -> Result<Job, JobError> {
        let removed = self
            .registry
            .update(|jobs| {
                let index = jobs
                    .iter()
                    .position(|job| job.id == id)
                    .ok_or(JobError::NotFound(id))?;
                if jobs[index].is_live() {
                    return Err(JobError::JobStillLive(id));
                }
                Ok(jobs.remove(index))
            })
            .await?;

        if let Err(e) = self.tracking.remove(id) {
            tracing::warn!("Failed to remove tracking files for job {}: {:#}", id, e);
        }
        let log = self.supervisor.log_path(id);
        match std::fs::remove_file(&log) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", log.display(), e),
        }

        tracing::info!("Job removed: {}", id);
        Ok(removed)
    }

    /// Puts a finished job back to `Waiting`
    pub async fn retry(&self, id: Uuid) -> Result<Job, JobError> {
        let job = self
            .registry
            .update(|jobs| {
                let job = jobs
                    .iter_mut()
                    .find(|job| job.id == id)
                    .ok_or(JobError::NotFound(id))?;
                validate_retry(&job.status)?;

                job.status = JobStatus::Waiting;
                job.process_handle = None;
                job.annotation = None;
                Ok::<_, JobError>(job.clone())
            })
            .await?;

        tracing::info!("Job {} queued for retry", id);
        Ok(job)
    }

    /// Last `lines` lines of a job's encoder log
    pub async fn log_tail(&self, id: Uuid, lines: usize) -> Result<LogTail, JobError> {
        self.get(id).await?;

        let text = encoder::read_log_tail(&self.supervisor.log_path(id), LOG_TAIL_BYTES)
            .map_err(|e| JobError::Internal(format!("failed to read log: {}", e)))?;

        Ok(LogTail {
            job_id: id,
            lines: encoder::tail_lines(&text, lines.clamp(1, MAX_LOG_LINES)),
        })
    }

    pub async fn status_summary(&self) -> Result<StatusSummary, JobError> {
        let jobs = self.registry.load().await?;

        let mut counts = StatusCounts::default();
        let mut channels: BTreeMap<String, StatusCounts> = BTreeMap::new();
        for job in &jobs {
            counts.record(&job.status);
            channels
                .entry(job.channel.clone())
                .or_default()
                .record(&job.status);
        }

        let host = tokio::task::spawn_blocking(process::sample_host_usage)
            .await
            .map_err(|e| JobError::Internal(format!("host usage sampling failed: {}", e)))?;

        Ok(StatusSummary {
            clock: config::schedule_now(self.schedule_offset)
                .format("%H:%M")
                .to_string(),
            counts,
            channels,
            host,
        })
    }

    /// Media files in the media directory, sorted by name
    pub fn list_videos(&self) -> Result<Vec<VideoFile>, JobError> {
        let entries = std::fs::read_dir(&self.media_dir).map_err(|e| {
            JobError::Internal(format!(
                "failed to list {}: {}",
                self.media_dir.display(),
                e
            ))
        })?;

        let mut videos: Vec<VideoFile> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                let ext = path.extension()?.to_str()?.to_ascii_lowercase();
                if !VIDEO_EXTENSIONS.contains(&ext.as_str()) {
                    return None;
                }
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                Some(VideoFile {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size_bytes: metadata.len(),
                })
            })
            .collect();

        videos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(videos)
    }

    pub fn channels(&self) -> Result<ChannelList, JobError> {
        let mut channels = self
            .supervisor
            .broadcasts()
            .channels()
            .map_err(|e| JobError::Internal(format!("failed to list channels: {}", e)))?;

        if !channels.iter().any(|c| c == DEFAULT_CHANNEL) {
            channels.insert(0, DEFAULT_CHANNEL.to_string());
        }
        Ok(ChannelList { channels })
    }
}

fn validate_create(req: &CreateJob) -> Result<(), JobError> {
    if req.source.as_os_str().is_empty() {
        return Err(JobError::ValidationError("source is required".to_string()));
    }

    let has_key = req
        .destination_key
        .as_deref()
        .is_some_and(|k| !k.trim().is_empty());

    match (&req.broadcast, has_key) {
        (Some(_), true) => Err(JobError::ValidationError(
            "give either destination_key or broadcast, not both".to_string(),
        )),
        (None, false) => Err(JobError::ValidationError(
            "destination_key or broadcast is required".to_string(),
        )),
        (Some(b), false) if b.title.trim().is_empty() => Err(JobError::ValidationError(
            "broadcast title is required".to_string(),
        )),
        _ => Ok(()),
    }
}

fn validate_retry(status: &JobStatus) -> Result<(), JobError> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(JobError::InvalidState(format!(
            "only finished jobs can be retried (current: {})",
            status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecast_core::dto::job::BroadcastRequest;

    fn request(key: Option<&str>, broadcast: Option<&str>) -> CreateJob {
        CreateJob {
            title: None,
            channel: None,
            source: PathBuf::from("demo.mp4"),
            destination_key: key.map(str::to_string),
            quality: None,
            vertical: false,
            scheduled_start: None,
            broadcast: broadcast.map(|title| BroadcastRequest {
                title: title.to_string(),
                description: String::new(),
                privacy: Default::default(),
            }),
        }
    }

    #[test]
    fn test_validate_create() {
        assert!(validate_create(&request(Some("abcd1234"), None)).is_ok());
        assert!(validate_create(&request(None, Some("Show"))).is_ok());
        assert!(validate_create(&request(None, None)).is_err());
        assert!(validate_create(&request(Some("  "), None)).is_err());
        assert!(validate_create(&request(Some("k"), Some("Show"))).is_err());
        assert!(validate_create(&request(None, Some(" "))).is_err());
    }

    #[test]
    fn test_validate_retry() {
        assert!(validate_retry(&JobStatus::Stopped).is_ok());
        assert!(validate_retry(&JobStatus::Disconnected).is_ok());
        assert!(validate_retry(&JobStatus::error("x")).is_ok());
        assert!(validate_retry(&JobStatus::Waiting).is_err());
        assert!(validate_retry(&JobStatus::Live).is_err());
    }
}
