//! Per-job tracking artifacts
//!
//! Each live job has `<id>.pid` (a JSON [`PidMarker`]) and `<id>.status`
//! (the status label) in the tracking directory. They let a restarted
//! controller recognise encoders it did not spawn itself.

use anyhow::{Context, Result};
use livecast_core::domain::job::JobStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const PID_EXT: &str = "pid";
const STATUS_EXT: &str = "status";

/// Identity of a spawned encoder process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidMarker {
    pub pid: u32,
    /// Program the controller launched
    #[serde(default)]
    pub program: String,
    /// Process start time in seconds since the epoch, as reported by the OS
    #[serde(default)]
    pub started_at: Option<u64>,
}

pub struct TrackingStore {
    dir: PathBuf,
}

impl TrackingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, job_id: Uuid, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", job_id, ext))
    }

    /// Writes both markers for a freshly started job
    pub fn write(&self, job_id: Uuid, marker: &PidMarker, status: &JobStatus) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let body = serde_json::to_string(marker).context("Failed to encode pid marker")?;
        let pid_file = self.file(job_id, PID_EXT);
        std::fs::write(&pid_file, body)
            .with_context(|| format!("Failed to write {}", pid_file.display()))?;

        self.write_status(job_id, status)
    }

    pub fn write_status(&self, job_id: Uuid, status: &JobStatus) -> Result<()> {
        let status_file = self.file(job_id, STATUS_EXT);
        std::fs::write(&status_file, status.label())
            .with_context(|| format!("Failed to write {}", status_file.display()))
    }

    /// Reads the pid marker of a job, `None` when there is none
    ///
    /// A bare integer is accepted as a marker without identity details.
    pub fn read_pid(&self, job_id: Uuid) -> Result<Option<PidMarker>> {
        let pid_file = self.file(job_id, PID_EXT);
        let raw = match std::fs::read_to_string(&pid_file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", pid_file.display()));
            }
        };

        if let Ok(pid) = raw.trim().parse::<u32>() {
            return Ok(Some(PidMarker {
                pid,
                program: String::new(),
                started_at: None,
            }));
        }

        let marker = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed pid marker {}", pid_file.display()))?;
        Ok(Some(marker))
    }

    /// Removes both markers; missing files are not an error
    pub fn remove(&self, job_id: Uuid) -> Result<()> {
        for ext in [PID_EXT, STATUS_EXT] {
            let path = self.file(job_id, ext);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to remove {}", path.display()));
                }
            }
        }
        Ok(())
    }

    /// Job ids that have at least one marker on disk
    pub fn tracked_jobs(&self) -> Result<BTreeSet<Uuid>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to list {}", self.dir.display()));
            }
        };

        let mut ids = BTreeSet::new();
        for entry in entries {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some(PID_EXT) | Some(STATUS_EXT)) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                ids.insert(id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::new(dir.path().join("tracking"));
        let id = Uuid::new_v4();
        let marker = PidMarker {
            pid: 4242,
            program: "ffmpeg".to_string(),
            started_at: Some(1_700_000_000),
        };

        store.write(id, &marker, &JobStatus::Live).unwrap();

        assert_eq!(store.read_pid(id).unwrap(), Some(marker));
        assert_eq!(
            std::fs::read_to_string(store.dir().join(format!("{id}.status"))).unwrap(),
            "live"
        );
        assert!(store.tracked_jobs().unwrap().contains(&id));

        store.remove(id).unwrap();
        store.remove(id).unwrap();
        assert!(store.read_pid(id).unwrap().is_none());
        assert!(store.tracked_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_bare_pid_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::new(dir.path());
        let id = Uuid::new_v4();
        std::fs::write(dir.path().join(format!("{id}.pid")), "1234\n").unwrap();

        let marker = store.read_pid(id).unwrap().unwrap();
        assert_eq!(marker.pid, 1234);
        assert!(marker.started_at.is_none());
    }

    #[test]
    fn test_unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::new(dir.path());
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("garbage.pid"), "1").unwrap();

        assert!(store.tracked_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_missing_dir_has_no_tracked_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::new(dir.path().join("absent"));
        assert!(store.tracked_jobs().unwrap().is_empty());
    }
}
