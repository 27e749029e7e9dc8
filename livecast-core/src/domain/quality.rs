//! Quality profile table
//!
//! Maps a quality label to the encoder parameters handed to the external
//! encoder. The table is fixed and lookups never fail: labels that are not
//! recognised resolve to `Quality::Medium`.

use serde::{Deserialize, Serialize};

/// Output quality of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Quality {
    /// 240p
    Minimal,
    /// 360p
    VeryLow,
    /// 480p
    Low,
    /// 720p
    #[default]
    Medium,
    /// 1080p
    High,
}

impl Quality {
    pub const ALL: [Quality; 5] = [
        Quality::Minimal,
        Quality::VeryLow,
        Quality::Low,
        Quality::Medium,
        Quality::High,
    ];

    /// Parses a label, falling back to `Medium` for anything unknown
    ///
    /// Accepts the canonical names (`low`, `medium`, `high`, ...) as well as
    /// the resolution labels (`480p`, `720p`, `1080p`, ...).
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "minimal" | "240p" => Quality::Minimal,
            "very_low" | "verylow" | "360p" => Quality::VeryLow,
            "low" | "480p" => Quality::Low,
            "medium" | "720p" => Quality::Medium,
            "high" | "1080p" => Quality::High,
            _ => Quality::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Minimal => "minimal",
            Quality::VeryLow => "very_low",
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }
}

impl From<String> for Quality {
    fn from(label: String) -> Self {
        Quality::from_label(&label)
    }
}

impl From<Quality> for String {
    fn from(quality: Quality) -> Self {
        quality.as_str().to_string()
    }
}

impl std::str::FromStr for Quality {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Quality::from_label(s))
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters passed through to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeParams {
    pub bitrate_kbps: u32,
    pub maxrate_kbps: u32,
    pub buffer_size_kbps: u32,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl EncodeParams {
    /// `WIDTHxHEIGHT`, as the encoder expects it
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Keyframe interval in frames (two seconds of video)
    pub fn keyframe_interval(&self) -> u32 {
        self.frame_rate * 2
    }
}

/// Resolves encoder parameters for a quality and orientation
pub fn resolve(quality: Quality, vertical: bool) -> EncodeParams {
    let (bitrate_kbps, width, height, frame_rate) = match quality {
        Quality::Minimal => (400, 426, 240, 24),
        Quality::VeryLow => (800, 640, 360, 24),
        Quality::Low => (1000, 854, 480, 30),
        Quality::Medium => (2500, 1280, 720, 30),
        Quality::High => (4500, 1920, 1080, 30),
    };

    let (width, height) = if vertical {
        (height, width)
    } else {
        (width, height)
    };

    EncodeParams {
        bitrate_kbps,
        maxrate_kbps: bitrate_kbps,
        buffer_size_kbps: bitrate_kbps * 2,
        width,
        height,
        frame_rate,
    }
}
