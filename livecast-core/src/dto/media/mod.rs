//! Media DTOs

use serde::{Deserialize, Serialize};

/// A media file available as a job source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFile {
    pub name: String,
    pub size_bytes: u64,
}

/// Names of channels that have platform credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelList {
    pub channels: Vec<String>,
}
