//! Reconciliation Scanner
//!
//! Runs at the start of every control loop activation. Repairs registry
//! state left behind by encoders that died while nobody was watching, picks
//! up encoders that outlived a controller restart, and removes tracking
//! files that no longer belong to a live job.

use livecast_core::domain::job::JobStatus;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::repository::registry::{JobRegistry, RegistryError};
use crate::repository::tracking::TrackingStore;
use crate::service::supervisor::Supervisor;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Live jobs examined
    pub checked: usize,
    /// Live jobs whose encoder is running
    pub trusted: usize,
    /// Trusted jobs that got a new watcher in this pass
    pub adopted: usize,
    /// Live jobs moved to `Disconnected`
    pub disconnected: usize,
    /// Stale tracking artifacts removed
    pub collected: usize,
    /// Per-job failures that were logged and skipped
    pub errors: usize,
}

pub struct Reconciler {
    registry: Arc<JobRegistry>,
    tracking: Arc<TrackingStore>,
    supervisor: Arc<Supervisor>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<JobRegistry>,
        tracking: Arc<TrackingStore>,
        supervisor: Arc<Supervisor>,
    ) -> Self {
        Self {
            registry,
            tracking,
            supervisor,
        }
    }

    /// Runs one pass
    ///
    /// Only an unreadable registry aborts the pass. Everything else is
    /// logged and counted in `errors`.
    pub async fn run(&self) -> Result<ReconcileReport, RegistryError> {
        let mut report = ReconcileReport::default();
        let jobs = self.registry.load().await?;

        let mut dead: Vec<(Uuid, Option<u32>)> = Vec::new();
        for job in jobs.iter().filter(|job| job.is_live()) {
            report.checked += 1;

            if self.supervisor.is_watched(job.id).await {
                report.trusted += 1;
                continue;
            }

            let Some(pid) = job.process_handle else {
                tracing::warn!("Job {} is live without a process handle", job.id);
                dead.push((job.id, None));
                continue;
            };

            let marker = self.supervisor.marker_for(job.id, pid);
            if self.supervisor.verify_encoder(&marker) {
                tracing::info!("Encoder of job {} (pid {}) is still running", job.id, pid);
                self.supervisor.adopt(job.id, marker).await;
                report.trusted += 1;
                report.adopted += 1;
            } else {
                tracing::warn!(
                    "Encoder of job {} (pid {}) is gone or the pid was reused",
                    job.id,
                    pid
                );
                dead.push((job.id, Some(pid)));
            }
        }

        if !dead.is_empty() {
            let disconnected = self
                .registry
                .update(|jobs| {
                    let mut changed = Vec::new();
                    for job in jobs.iter_mut() {
                        let matches = dead
                            .iter()
                            .any(|(id, pid)| *id == job.id && job.process_handle == *pid);
                        if job.is_live() && matches {
                            job.finish(JobStatus::Disconnected);
                            changed.push(job.clone());
                        }
                    }
                    Ok::<_, RegistryError>(changed)
                })
                .await?;

            for job in disconnected {
                report.disconnected += 1;
                if let Err(e) = self.tracking.remove(job.id) {
                    tracing::warn!("Failed to remove tracking files for job {}: {:#}", job.id, e);
                    report.errors += 1;
                }
                if let Some(broadcast_id) = &job.remote_broadcast_id {
                    self.supervisor.broadcasts().on_finished(
                        job.id,
                        job.channel.clone(),
                        broadcast_id.clone(),
                    );
                }
            }
        }

        self.collect_stale(&mut report).await?;

        if report.disconnected > 0 || report.adopted > 0 || report.collected > 0 {
            tracing::info!(
                "Reconciled: {} checked, {} adopted, {} disconnected, {} stale artifact(s) removed",
                report.checked,
                report.adopted,
                report.disconnected,
                report.collected
            );
        }

        Ok(report)
    }

    /// Removes tracking files of jobs that are gone or not live
    async fn collect_stale(&self, report: &mut ReconcileReport) -> Result<(), RegistryError> {
        let tracked = match self.tracking.tracked_jobs() {
            Ok(tracked) => tracked,
            Err(e) => {
                tracing::warn!("Cannot list tracking files: {:#}", e);
                report.errors += 1;
                return Ok(());
            }
        };
        if tracked.is_empty() {
            return Ok(());
        }

        // Fresh snapshot: jobs may have started since the scan above
        let live: HashSet<Uuid> = self
            .registry
            .load()
            .await?
            .into_iter()
            .filter(|job| job.is_live())
            .map(|job| job.id)
            .collect();

        for id in tracked.into_iter().filter(|id| !live.contains(id)) {
            match self.tracking.remove(id) {
                Ok(()) => {
                    tracing::debug!("Removed stale tracking files for job {}", id);
                    report.collected += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to remove stale tracking files for {}: {:#}", id, e);
                    report.errors += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::process::{ProcessInfo, ProcessProbe};
    use crate::repository::tracking::PidMarker;
    use crate::service::broadcast::BroadcastCoordinator;
    use crate::service::broadcast::tests::{FakePlatform, fast_timing};
    use crate::service::supervisor::SupervisorSettings;
    use livecast_core::domain::job::Job;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Process table with a fixed set of processes
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        processes: Mutex<HashMap<u32, ProcessInfo>>,
    }

    impl FakeProbe {
        pub fn add(&self, pid: u32, name: &str, start_time: u64) {
            self.processes.lock().unwrap().insert(
                pid,
                ProcessInfo {
                    pid,
                    name: name.to_string(),
                    cmd: vec![name.to_string()],
                    start_time,
                },
            );
        }
    }

    impl ProcessProbe for FakeProbe {
        fn inspect(&self, pid: u32) -> Option<ProcessInfo> {
            self.processes.lock().unwrap().get(&pid).cloned()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: Arc<JobRegistry>,
        tracking: Arc<TrackingStore>,
        probe: Arc<FakeProbe>,
        platform: Arc<FakePlatform>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(JobRegistry::new(dir.path().join("jobs.json")));
        let tracking = Arc::new(TrackingStore::new(dir.path().join("tracking")));
        let probe = Arc::new(FakeProbe::default());
        let platform = Arc::new(FakePlatform::default());
        let broadcasts = Arc::new(BroadcastCoordinator::new(
            platform.clone(),
            registry.clone(),
            fast_timing(),
        ));
        let supervisor = Arc::new(Supervisor::new(
            registry.clone(),
            tracking.clone(),
            probe.clone(),
            broadcasts,
            SupervisorSettings {
                program: "ffmpeg".to_string(),
                ingest_url: "rtmp://127.0.0.1/live2".to_string(),
                log_dir: dir.path().join("logs"),
                stop_grace: Duration::from_millis(100),
                adopt_poll_interval: Duration::from_secs(3600),
            },
        ));
        let reconciler = Reconciler::new(registry.clone(), tracking.clone(), supervisor);

        Fixture {
            _dir: dir,
            registry,
            tracking,
            probe,
            platform,
            reconciler,
        }
    }

    fn live_job(pid: u32) -> Job {
        let mut job = Job::new("demo.mp4", "abcd1234");
        job.status = JobStatus::Live;
        job.process_handle = Some(pid);
        job
    }

    fn marker(pid: u32, started_at: u64) -> PidMarker {
        PidMarker {
            pid,
            program: "ffmpeg".to_string(),
            started_at: Some(started_at),
        }
    }

    #[tokio::test]
    async fn test_dead_encoder_becomes_disconnected() {
        let f = fixture();
        let dead = live_job(4001);
        let waiting = Job::new("other.mp4", "key");
        f.registry
            .save(&[dead.clone(), waiting.clone()])
            .await
            .unwrap();
        f.tracking
            .write(dead.id, &marker(4001, 100), &JobStatus::Live)
            .unwrap();

        let report = f.reconciler.run().await.unwrap();

        let jobs = f.registry.load().await.unwrap();
        assert_eq!(jobs[0].id, dead.id);
        assert_eq!(jobs[0].status, JobStatus::Disconnected);
        assert!(jobs[0].process_handle.is_none());
        assert_eq!(jobs[1], waiting);
        assert_eq!(report.disconnected, 1);
        assert!(f.tracking.read_pid(dead.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undeletable_marker_does_not_halt_pass() {
        let f = fixture();
        let first = live_job(4101);
        let second = live_job(4102);
        f.registry
            .save(&[first.clone(), second.clone()])
            .await
            .unwrap();
        f.tracking
            .write(second.id, &marker(4102, 100), &JobStatus::Live)
            .unwrap();
        // A directory where the first job's pid marker should be cannot be removed as a file
        std::fs::create_dir_all(f.tracking.dir().join(format!("{}.pid", first.id))).unwrap();

        let report = f.reconciler.run().await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.disconnected, 2);
        assert_eq!(report.errors, 2);

        let jobs = f.registry.load().await.unwrap();
        assert!(jobs.iter().all(|job| job.status == JobStatus::Disconnected));
        assert!(f.tracking.read_pid(second.id).unwrap().is_none());
        assert!(!f.tracking.dir().join(format!("{}.status", second.id)).exists());
    }

    #[tokio::test]
    async fn test_running_encoder_is_trusted() {
        let f = fixture();
        let job = live_job(4002);
        f.registry.save(&[job.clone()]).await.unwrap();
        f.tracking
            .write(job.id, &marker(4002, 500), &JobStatus::Live)
            .unwrap();
        f.probe.add(4002, "ffmpeg", 500);

        let report = f.reconciler.run().await.unwrap();

        let stored = f.registry.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Live);
        assert_eq!(stored.process_handle, Some(4002));
        assert_eq!(report.trusted, 1);
        assert_eq!(report.adopted, 1);

        // Second pass sees the adoption watcher and does not adopt again
        let report = f.reconciler.run().await.unwrap();
        assert_eq!(report.trusted, 1);
        assert_eq!(report.adopted, 0);
    }

    #[tokio::test]
    async fn test_recycled_pid_is_disconnected() {
        let f = fixture();
        let job = live_job(4003);
        f.registry.save(&[job.clone()]).await.unwrap();
        f.tracking
            .write(job.id, &marker(4003, 500), &JobStatus::Live)
            .unwrap();
        // Same pid, but an unrelated process started later
        f.probe.add(4003, "postgres", 9000);

        f.reconciler.run().await.unwrap();

        let stored = f.registry.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_stale_tracking_files_are_collected() {
        let f = fixture();
        let stopped = {
            let mut job = Job::new("demo.mp4", "k");
            job.status = JobStatus::Stopped;
            job
        };
        f.registry.save(&[stopped.clone()]).await.unwrap();

        let orphan = Uuid::new_v4();
        f.tracking
            .write(orphan, &marker(1, 1), &JobStatus::Live)
            .unwrap();
        f.tracking
            .write(stopped.id, &marker(2, 2), &JobStatus::Live)
            .unwrap();

        let report = f.reconciler.run().await.unwrap();

        assert_eq!(report.collected, 2);
        assert!(f.tracking.tracked_jobs().unwrap().is_empty());
        assert_eq!(
            f.registry.get(stopped.id).await.unwrap().unwrap().status,
            JobStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_disconnect_finalizes_broadcast() {
        let f = fixture();
        let mut job = live_job(4004);
        job.remote_broadcast_id = Some("b-1".to_string());
        f.registry.save(&[job]).await.unwrap();

        f.reconciler.run().await.unwrap();

        for _ in 0..50 {
            if f.platform.calls().iter().any(|c| c == "transition b-1 complete") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("broadcast was not completed");
    }

    #[tokio::test]
    async fn test_corrupt_registry_aborts_pass() {
        let f = fixture();
        std::fs::write(f.registry.path(), "{{{").unwrap();

        assert!(matches!(
            f.reconciler.run().await,
            Err(RegistryError::Corruption { .. })
        ));
    }
}
