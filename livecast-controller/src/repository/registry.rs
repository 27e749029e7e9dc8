//! Job Registry
//!
//! File-backed store of every job. The whole set is read, mutated and
//! atomically replaced on each change; there is no partial update.

use livecast_core::domain::job::Job;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Registry error type
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to access registry {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but cannot be decoded. It is left in place.
    #[error("registry {} is unreadable: {reason}", path.display())]
    Corruption {
        path: PathBuf,
        reason: String,
        preserved: Option<PathBuf>,
    },

    #[error("failed to serialize registry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable list of jobs
///
/// All mutation goes through [`JobRegistry::update`], which holds the
/// registry lock for the full read-modify-write so concurrent activations
/// never interleave.
pub struct JobRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JobRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads a snapshot of all jobs
    pub async fn load(&self) -> Result<Vec<Job>, RegistryError> {
        let _guard = self.lock.lock().await;
        self.read_locked()
    }

    /// Replaces the stored job list
    pub async fn save(&self, jobs: &[Job]) -> Result<(), RegistryError> {
        let _guard = self.lock.lock().await;
        self.write_locked(jobs)
    }

    /// Runs `f` against the current job list and persists the result
    ///
    /// Nothing is written when `f` fails or leaves the list unchanged.
    pub async fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Vec<Job>) -> Result<T, E>,
        E: From<RegistryError>,
    {
        let _guard = self.lock.lock().await;
        let mut jobs = self.read_locked()?;
        let before = jobs.clone();

        let out = f(&mut jobs)?;

        if jobs != before {
            self.write_locked(&jobs)?;
        }

        Ok(out)
    }

    /// Finds a single job in a fresh snapshot
    pub async fn get(&self, id: Uuid) -> Result<Option<Job>, RegistryError> {
        Ok(self.load().await?.into_iter().find(|job| job.id == id))
    }

    /// Sets the annotation of a job without touching its status
    ///
    /// Returns false when the job no longer exists.
    pub async fn annotate(&self, id: Uuid, note: impl Into<String>) -> Result<bool, RegistryError> {
        let note = note.into();
        self.update(|jobs| match jobs.iter_mut().find(|job| job.id == id) {
            Some(job) => {
                job.annotation = Some(note);
                Ok(true)
            }
            None => Ok(false),
        })
        .await
    }

    fn read_locked(&self) -> Result<Vec<Job>, RegistryError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RegistryError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if raw.trim().is_empty() {
            return Err(self.corrupted(&raw, "file is empty".to_string()));
        }

        let records: Vec<serde_json::Value> =
            serde_json::from_str(&raw).map_err(|e| self.corrupted(&raw, e.to_string()))?;

        let missing_ids = records
            .iter()
            .filter(|r| r.get("id").is_none())
            .count();

        let jobs = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                serde_json::from_value::<Job>(record)
                    .map_err(|e| self.corrupted(&raw, format!("record {}: {}", index, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if missing_ids > 0 {
            tracing::info!(
                "Assigning ids to {} legacy job record(s) in {}",
                missing_ids,
                self.path.display()
            );
            self.write_locked(&jobs)?;
        }

        Ok(jobs)
    }

    fn write_locked(&self, jobs: &[Job]) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let body = serde_json::to_vec_pretty(jobs)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&body).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        Ok(())
    }

    /// Builds a corruption error, copying the unreadable contents aside
    ///
    /// Each distinct corruption gets its own `<file>.corrupt.<timestamp>`
    /// copy. Contents that already have a copy are not copied again.
    fn corrupted(&self, raw: &str, reason: String) -> RegistryError {
        let preserved = match self.preserve(raw) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!("Failed to copy unreadable registry aside: {}", e);
                None
            }
        };

        tracing::error!(
            "Registry {} is unreadable ({}), refusing to continue",
            self.path.display(),
            reason
        );

        RegistryError::Corruption {
            path: self.path.clone(),
            reason,
            preserved,
        }
    }

    fn preserve(&self, raw: &str) -> std::io::Result<PathBuf> {
        let prefix = format!("{}.corrupt.", self.file_name());

        if let Some(existing) = self.corrupt_copies()?.into_iter().find(|copy| {
            std::fs::read(copy)
                .map(|bytes| bytes == raw.as_bytes())
                .unwrap_or(false)
        }) {
            return Ok(existing);
        }

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}{}", prefix, stamp)
            } else {
                format!("{}{}-{}", prefix, stamp, attempt)
            };
            let backup = self.path.with_file_name(name);

            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&backup)
            {
                Ok(mut file) => {
                    file.write_all(raw.as_bytes())?;
                    file.sync_all()?;
                    return Ok(backup);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Copies made by earlier corruptions, oldest name first
    pub fn corrupt_copies(&self) -> std::io::Result<Vec<PathBuf>> {
        let prefix = format!("{}.corrupt.", self.file_name());
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut copies: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&prefix))
            })
            .collect();
        copies.sort();
        Ok(copies)
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "jobs.json".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecast_core::domain::job::JobStatus;
    use std::sync::Arc;

    fn registry_in(dir: &tempfile::TempDir) -> JobRegistry {
        JobRegistry::new(dir.path().join("jobs.json"))
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);
        assert!(registry.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_keeps_order_and_ids() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);
        let jobs = vec![Job::new("a.mp4", "key-a"), Job::new("b.mp4", "key-b")];

        registry.save(&jobs).await.unwrap();
        let loaded = registry.load().await.unwrap();

        assert_eq!(loaded, jobs);
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);
        std::fs::write(registry.path(), "[{ not json").unwrap();

        let err = registry.load().await.unwrap_err();
        match err {
            RegistryError::Corruption { preserved, .. } => {
                let preserved = preserved.expect("copy should be kept");
                let name = preserved.file_name().unwrap().to_str().unwrap().to_string();
                assert!(name.starts_with("jobs.json.corrupt."), "{name}");
                assert_eq!(std::fs::read_to_string(preserved).unwrap(), "[{ not json");
            }
            other => panic!("unexpected error: {other}"),
        }

        // An update must not overwrite the unreadable file
        let result: Result<(), RegistryError> = registry
            .update(|jobs| {
                jobs.push(Job::new("c.mp4", "key"));
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(
            std::fs::read_to_string(registry.path()).unwrap(),
            "[{ not json"
        );
    }

    #[tokio::test]
    async fn test_each_corruption_keeps_its_own_copy() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);

        std::fs::write(registry.path(), "[{ first").unwrap();
        assert!(registry.load().await.is_err());
        // Same bytes again: no new copy
        assert!(registry.load().await.is_err());
        assert_eq!(registry.corrupt_copies().unwrap().len(), 1);

        std::fs::write(registry.path(), "[{ second").unwrap();
        assert!(registry.load().await.is_err());

        let copies = registry.corrupt_copies().unwrap();
        assert_eq!(copies.len(), 2);
        let mut contents: Vec<String> = copies
            .iter()
            .map(|copy| std::fs::read_to_string(copy).unwrap())
            .collect();
        contents.sort();
        assert_eq!(contents, vec!["[{ first", "[{ second"]);
    }

    #[tokio::test]
    async fn test_empty_file_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);
        std::fs::write(registry.path(), "").unwrap();

        assert!(matches!(
            registry.load().await,
            Err(RegistryError::Corruption { .. })
        ));
    }

    #[tokio::test]
    async fn test_legacy_records_get_stable_ids() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);
        std::fs::write(
            registry.path(),
            r#"[{ "source": "demo.mp4", "destination_key": "abcd1234", "quality": "High" }]"#,
        )
        .unwrap();

        let first = registry.load().await.unwrap();
        let second = registry.load().await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[0].status, JobStatus::Waiting);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(registry_in(&dir));

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .update(|jobs| {
                        jobs.push(Job::new(format!("{i}.mp4"), "key"));
                        Ok::<_, RegistryError>(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(registry.load().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_failed_update_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);
        registry.save(&[Job::new("a.mp4", "k")]).await.unwrap();

        #[derive(Debug)]
        struct Refused;
        impl From<RegistryError> for Refused {
            fn from(_: RegistryError) -> Self {
                Refused
            }
        }

        let result = registry
            .update(|jobs| {
                jobs.clear();
                Err::<(), _>(Refused)
            })
            .await;

        assert!(result.is_err());
        assert_eq!(registry.load().await.unwrap().len(), 1);
    }
}
