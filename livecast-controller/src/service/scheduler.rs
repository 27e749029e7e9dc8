//! Scheduler
//!
//! Starts waiting jobs whose scheduled time of day has come. It is ticked
//! once per control loop activation and never runs on its own timer.

use chrono::{DateTime, FixedOffset};
use livecast_core::domain::job::JobStatus;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config;
use crate::repository::registry::{JobRegistry, RegistryError};
use crate::service::supervisor::{Supervisor, SupervisorError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub started: usize,
    pub failed: usize,
}

pub struct Scheduler {
    registry: Arc<JobRegistry>,
    supervisor: Arc<Supervisor>,
    schedule_offset: Option<FixedOffset>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<JobRegistry>,
        supervisor: Arc<Supervisor>,
        schedule_offset: Option<FixedOffset>,
    ) -> Self {
        Self {
            registry,
            supervisor,
            schedule_offset,
        }
    }

    pub async fn tick(&self) -> Result<TickReport, RegistryError> {
        self.tick_at(config::schedule_now(self.schedule_offset))
            .await
    }

    /// Starts every waiting job that is due at `now`
    ///
    /// A job that fails to start stays `Waiting` with the failure in its
    /// annotation and is tried again on the next tick.
    pub async fn tick_at(&self, now: DateTime<FixedOffset>) -> Result<TickReport, RegistryError> {
        let clock = now.time();
        let due: Vec<Uuid> = self
            .registry
            .load()
            .await?
            .into_iter()
            .filter(|job| job.status == JobStatus::Waiting && job.scheduled_start.is_due(clock))
            .map(|job| job.id)
            .collect();

        let mut report = TickReport {
            due: due.len(),
            ..Default::default()
        };

        for id in due {
            match self.supervisor.start(id).await {
                Ok(job) => {
                    tracing::info!(
                        "Scheduled job {} ({}) started at {}",
                        id,
                        job.scheduled_start,
                        now.format("%H:%M")
                    );
                    report.started += 1;
                }
                Err(SupervisorError::InvalidState { status, .. }) => {
                    // Started by someone else since the snapshot
                    tracing::debug!("Skipping job {}: already {}", id, status);
                }
                Err(SupervisorError::NotFound(_)) => {
                    tracing::debug!("Skipping job {}: removed", id);
                }
                Err(e) => {
                    tracing::warn!("Failed to start scheduled job {}: {}", id, e);
                    report.failed += 1;
                    if let Err(e) = self.registry.annotate(id, e.to_string()).await {
                        tracing::error!("Failed to annotate job {}: {}", id, e);
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::service::supervisor::tests::{harness, wait_for_status};
    use chrono::{NaiveTime, TimeZone};
    use livecast_core::domain::job::Job;
    use livecast_core::domain::schedule::ScheduledStart;

    fn at(h: u32, m: u32) -> ScheduledStart {
        ScheduledStart::At(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn now(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 10, h, m, s)
            .unwrap()
    }

    #[tokio::test]
    async fn test_due_and_future_jobs() {
        let h = harness("sleep 30");
        let mut due = Job::new(&h.source, "key-a");
        due.scheduled_start = at(14, 5);
        let mut future = Job::new(&h.source, "key-b");
        future.scheduled_start = at(14, 6);
        let mut immediate = Job::new(&h.source, "key-c");
        immediate.scheduled_start = ScheduledStart::Immediate;
        h.registry
            .save(&[due.clone(), future.clone(), immediate.clone()])
            .await
            .unwrap();

        let scheduler = Scheduler::new(h.registry.clone(), h.supervisor.clone(), None);
        let report = scheduler.tick_at(now(14, 5, 30)).await.unwrap();

        assert_eq!(report.due, 2);
        assert_eq!(report.started, 2);
        assert_eq!(
            h.registry.get(due.id).await.unwrap().unwrap().status,
            JobStatus::Live
        );
        assert_eq!(
            h.registry.get(immediate.id).await.unwrap().unwrap().status,
            JobStatus::Live
        );
        assert_eq!(
            h.registry.get(future.id).await.unwrap().unwrap().status,
            JobStatus::Waiting
        );

        // A second tick starts nothing new
        let report = scheduler.tick_at(now(14, 5, 45)).await.unwrap();
        assert_eq!(report.due, 0);

        h.supervisor.stop(due.id).await.unwrap();
        h.supervisor.stop(immediate.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_missed_schedule_fires_late() {
        let h = harness("sleep 30");
        let mut job = Job::new(&h.source, "key");
        job.scheduled_start = at(6, 0);
        h.registry.save(&[job.clone()]).await.unwrap();

        let scheduler = Scheduler::new(h.registry.clone(), h.supervisor.clone(), None);
        let report = scheduler.tick_at(now(18, 0, 0)).await.unwrap();

        assert_eq!(report.started, 1);
        h.supervisor.stop(job.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_failure_is_annotated() {
        let h = harness("sleep 30");
        let job = Job::new(h.dir.path().join("missing.mp4"), "key");
        h.registry.save(&[job.clone()]).await.unwrap();

        let scheduler = Scheduler::new(h.registry.clone(), h.supervisor.clone(), None);
        let report = scheduler.tick_at(now(12, 0, 0)).await.unwrap();

        assert_eq!(report.failed, 1);
        let stored = h.registry.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Waiting);
        assert!(stored.annotation.unwrap().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_finished_jobs_are_not_restarted() {
        let h = harness("exit 0");
        let mut job = Job::new(&h.source, "key");
        job.status = JobStatus::Completed;
        h.registry.save(&[job.clone()]).await.unwrap();

        let scheduler = Scheduler::new(h.registry.clone(), h.supervisor.clone(), None);
        let report = scheduler.tick_at(now(12, 0, 0)).await.unwrap();

        assert_eq!(report.due, 0);
        let job = wait_for_status(&h.registry, job.id, |s| *s == JobStatus::Completed).await;
        assert!(job.process_handle.is_none());
    }
}
