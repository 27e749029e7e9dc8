//! Remote broadcast platform
//!
//! The platform owns a broadcast resource with its own lifecycle
//! (`ready -> testing -> live -> complete`) bound to an ingest stream.
//! The controller only talks to it through [`BroadcastPlatform`].

pub mod youtube;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use livecast_core::domain::broadcast::{BroadcastState, Privacy};
use thiserror::Error;

pub use youtube::YouTubePlatform;

/// Platform error type
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("no credentials for channel '{0}'")]
    MissingCredentials(String),

    #[error("broadcast or stream not found: {0}")]
    NotFound(String),

    /// The broadcast is already in, or past, the requested state
    #[error("redundant transition: {0}")]
    RedundantTransition(String),

    #[error("platform rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("platform unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected platform response: {0}")]
    Parse(String),
}

impl PlatformError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Unavailable { .. } => true,
            PlatformError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

/// Broadcast to create
#[derive(Debug, Clone)]
pub struct NewBroadcast {
    pub title: String,
    pub description: String,
    pub privacy: Privacy,
    pub scheduled_start: DateTime<FixedOffset>,
}

/// Ingest stream created on the platform
#[derive(Debug, Clone)]
pub struct IngestStream {
    pub id: String,
    pub stream_key: String,
}

#[async_trait]
pub trait BroadcastPlatform: Send + Sync {
    /// Channels that have credentials configured
    fn channels(&self) -> std::io::Result<Vec<String>>;

    /// Creates a broadcast and returns its id
    async fn create_broadcast(
        &self,
        channel: &str,
        broadcast: &NewBroadcast,
    ) -> Result<String, PlatformError>;

    /// Creates an ingest stream for a broadcast titled `title`
    async fn create_stream(&self, channel: &str, title: &str)
    -> Result<IngestStream, PlatformError>;

    async fn bind_stream(
        &self,
        channel: &str,
        broadcast_id: &str,
        stream_id: &str,
    ) -> Result<(), PlatformError>;

    /// Requests a lifecycle transition of a broadcast
    async fn transition(
        &self,
        channel: &str,
        broadcast_id: &str,
        state: BroadcastState,
    ) -> Result<(), PlatformError>;
}
