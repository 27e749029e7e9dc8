//! Remote broadcast domain types

use serde::{Deserialize, Serialize};

/// Lifecycle state of a remote broadcast
///
/// The platform only accepts forward transitions
/// `ready -> testing -> live -> complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastState {
    Ready,
    Testing,
    Live,
    Complete,
}

impl BroadcastState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastState::Ready => "ready",
            BroadcastState::Testing => "testing",
            BroadcastState::Live => "live",
            BroadcastState::Complete => "complete",
        }
    }
}

impl std::fmt::Display for BroadcastState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visibility of a provisioned broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Public,
    Unlisted,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Unlisted => "unlisted",
            Privacy::Private => "private",
        }
    }
}
