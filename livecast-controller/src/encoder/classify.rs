//! Terminal outcome classification
//!
//! Decides how a job ends from the encoder's exit and the tail of its log.

use livecast_core::domain::job::JobStatus;

/// How the encoder process exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code 0
    Success,
    /// Non-zero exit code
    Failure,
    /// Killed by a signal, or the exit could not be observed
    Unknown,
}

impl From<std::process::ExitStatus> for ExitKind {
    fn from(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(0) => ExitKind::Success,
            Some(_) => ExitKind::Failure,
            None => ExitKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Disconnected,
    Error(String),
}

impl From<Outcome> for JobStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed => JobStatus::Completed,
            Outcome::Disconnected => JobStatus::Disconnected,
            Outcome::Error(reason) => JobStatus::error(reason),
        }
    }
}

/// Known failure lines and the reason reported for them, checked in order
const FAILURE_SIGNATURES: &[(&str, &str)] = &[
    ("Connection refused", "ingest connection refused"),
    ("Connection timed out", "ingest connection timed out"),
    ("Failed to resolve hostname", "ingest host unreachable"),
    ("Cannot open connection", "ingest host unreachable"),
    ("Server error", "server rejected stream"),
    ("Server returned 4", "server rejected stream"),
    ("No such file or directory", "source unreadable"),
    (
        "Invalid data found when processing input",
        "source is not a valid media file",
    ),
    ("Unknown encoder", "encoder missing required codec"),
    ("Error opening output", "could not open ingest output"),
    ("Could not write header", "could not open ingest output"),
];

/// Written by ffmpeg when it finalises the output normally
const COMPLETION_MARKER: &str = "muxing overhead";

pub fn classify(exit: ExitKind, log_tail: &str) -> Outcome {
    if let Some((_, reason)) = FAILURE_SIGNATURES
        .iter()
        .find(|(needle, _)| log_tail.contains(needle))
    {
        return Outcome::Error(reason.to_string());
    }

    match exit {
        ExitKind::Success => Outcome::Completed,
        ExitKind::Unknown if log_tail.contains(COMPLETION_MARKER) => Outcome::Completed,
        ExitKind::Failure | ExitKind::Unknown => Outcome::Disconnected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_wins_over_exit_code() {
        let log = "[tcp @ 0x55] Connection to tcp://a.rtmp:1935 failed: Connection refused\n";
        assert_eq!(
            classify(ExitKind::Failure, log),
            Outcome::Error("ingest connection refused".to_string())
        );
        assert_eq!(
            classify(ExitKind::Success, log),
            Outcome::Error("ingest connection refused".to_string())
        );
    }

    #[test]
    fn test_server_rejection() {
        let log = "[rtmp @ 0x1] Server error: Stream key is invalid\n";
        assert_eq!(
            classify(ExitKind::Failure, log),
            Outcome::Error("server rejected stream".to_string())
        );
    }

    #[test]
    fn test_silent_failure_is_disconnected() {
        assert_eq!(classify(ExitKind::Failure, ""), Outcome::Disconnected);
        assert_eq!(
            classify(ExitKind::Unknown, "frame= 100 fps=30\n"),
            Outcome::Disconnected
        );
    }

    #[test]
    fn test_clean_exit_is_completed() {
        assert_eq!(classify(ExitKind::Success, ""), Outcome::Completed);
        assert_eq!(
            classify(
                ExitKind::Unknown,
                "video:100kB audio:10kB muxing overhead: 0.5%\n"
            ),
            Outcome::Completed
        );
    }

    #[test]
    fn test_outcome_maps_to_status() {
        assert_eq!(JobStatus::from(Outcome::Completed), JobStatus::Completed);
        assert_eq!(
            JobStatus::from(Outcome::Error("x".to_string())),
            JobStatus::error("x")
        );
    }
}
