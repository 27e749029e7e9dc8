//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::quality::Quality;
use crate::domain::schedule::ScheduledStart;

/// Channel used when a record does not name one
pub const DEFAULT_CHANNEL: &str = "default";

/// One scheduled or running stream task
///
/// This is the persisted record. Every field except `source` is optional on
/// load so that older registry files keep working; missing values fall back
/// to the defaults documented on each field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Stable identity, independent of the position in the registry.
    /// Records written before ids existed get a fresh one on load.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Human readable label, defaults to empty
    #[serde(default)]
    pub title: String,

    /// Platform channel whose credentials are used for broadcast calls
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Media file fed to the encoder
    pub source: PathBuf,

    /// Ingest key appended to the ingest endpoint
    #[serde(default)]
    pub destination_key: StreamKey,

    /// Defaults to `Quality::Medium`
    #[serde(default)]
    pub quality: Quality,

    /// Swap output dimensions for portrait streams
    #[serde(default)]
    pub vertical: bool,

    /// Defaults to `ScheduledStart::Immediate`
    #[serde(default)]
    pub scheduled_start: ScheduledStart,

    #[serde(default)]
    pub status: JobStatus,

    /// OS process id of the encoder while the job is live
    #[serde(default)]
    pub process_handle: Option<u32>,

    /// Remote broadcast bound to this job
    #[serde(default)]
    pub remote_broadcast_id: Option<String>,

    /// Non-fatal note, e.g. a failed remote transition
    #[serde(default)]
    pub annotation: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the encoder was last started (display only)
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// When the job last left `Live`
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a new waiting job with a fresh id
    pub fn new(source: impl Into<PathBuf>, destination_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: String::new(),
            channel: default_channel(),
            source: source.into(),
            destination_key: StreamKey::new(destination_key),
            quality: Quality::default(),
            vertical: false,
            scheduled_start: ScheduledStart::default(),
            status: JobStatus::Waiting,
            process_handle: None,
            remote_broadcast_id: None,
            annotation: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == JobStatus::Live
    }

    /// Moves the job out of `Live` into a terminal status and drops the process handle
    pub fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.process_handle = None;
        self.ended_at = Some(Utc::now());
    }
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

/// Job lifecycle status
///
/// `Waiting -> Live -> {Completed, Disconnected, Error}` and `Live -> Stopped`.
/// Terminal states go back to `Waiting` only through an explicit retry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Waiting,
    Live,
    Completed,
    Stopped,
    Disconnected,
    Error {
        reason: String,
    },
}

impl JobStatus {
    pub fn error(reason: impl Into<String>) -> Self {
        JobStatus::Error {
            reason: reason.into(),
        }
    }

    /// Returns true for states a retry may leave
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Stopped
                | JobStatus::Disconnected
                | JobStatus::Error { .. }
        )
    }

    /// Short lower-case label used in tracking files and counters
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Live => "live",
            JobStatus::Completed => "completed",
            JobStatus::Stopped => "stopped",
            JobStatus::Disconnected => "disconnected",
            JobStatus::Error { .. } => "error",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "Waiting"),
            JobStatus::Live => write!(f, "Live"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Stopped => write!(f, "Stopped"),
            JobStatus::Disconnected => write!(f, "Disconnected"),
            JobStatus::Error { reason } => write!(f, "Error: {}", reason),
        }
    }
}

/// Ingest credential
///
/// Serialized in full so the registry can hand it to the encoder, but
/// `Debug` and `Display` only ever show a redacted form.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for building the ingest URL only
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First four characters followed by a mask
    pub fn redacted(&self) -> String {
        let visible: String = self.0.chars().take(4).collect();
        if self.0.chars().count() <= 4 {
            "****".to_string()
        } else {
            format!("{}****", visible)
        }
    }
}

impl std::fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamKey({})", self.redacted())
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}
