//! Broadcast Lifecycle Coordinator
//!
//! Follows the local encoder with the remote broadcast: `testing` then
//! `live` after the encoder starts, `complete` once it ends. Every call is
//! best-effort. A failure is written to the job's annotation and never
//! changes the job's status or the encoder.

use chrono::{DateTime, FixedOffset};
use livecast_core::domain::broadcast::BroadcastState;
use livecast_core::dto::job::BroadcastRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::platform::{BroadcastPlatform, NewBroadcast, PlatformError};
use crate::repository::registry::JobRegistry;

#[derive(Debug, Clone, Copy)]
pub struct BroadcastTiming {
    /// Wait after encoder start before `testing`
    pub settle: Duration,
    /// Wait between `testing` and `live`
    pub step: Duration,
    /// Wait before the single retry of a transient failure
    pub retry_backoff: Duration,
}

/// A broadcast created and bound to a fresh ingest stream
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub broadcast_id: String,
    pub stream_key: String,
}

pub struct BroadcastCoordinator {
    platform: Arc<dyn BroadcastPlatform>,
    registry: Arc<JobRegistry>,
    timing: BroadcastTiming,
}

impl BroadcastCoordinator {
    pub fn new(
        platform: Arc<dyn BroadcastPlatform>,
        registry: Arc<JobRegistry>,
        timing: BroadcastTiming,
    ) -> Self {
        Self {
            platform,
            registry,
            timing,
        }
    }

    /// Creates a broadcast, creates an ingest stream and binds them
    ///
    /// # Arguments
    /// * `channel` - Channel whose credentials are used
    /// * `request` - Title, description and privacy of the broadcast
    /// * `scheduled_start` - Start time announced on the platform
    pub async fn provision(
        &self,
        channel: &str,
        request: &BroadcastRequest,
        scheduled_start: DateTime<FixedOffset>,
    ) -> Result<Provisioned, PlatformError> {
        let broadcast = NewBroadcast {
            title: request.title.clone(),
            description: request.description.clone(),
            privacy: request.privacy,
            scheduled_start,
        };

        let broadcast_id = self.platform.create_broadcast(channel, &broadcast).await?;
        let stream = self.platform.create_stream(channel, &request.title).await?;
        self.platform
            .bind_stream(channel, &broadcast_id, &stream.id)
            .await?;

        tracing::info!(
            "Broadcast {} bound to stream {} on channel {}",
            broadcast_id,
            stream.id,
            channel
        );

        Ok(Provisioned {
            broadcast_id,
            stream_key: stream.stream_key,
        })
    }

    pub fn channels(&self) -> std::io::Result<Vec<String>> {
        self.platform.channels()
    }

    /// Called after a job's encoder has started
    pub fn on_started(
        self: &Arc<Self>,
        job_id: Uuid,
        channel: String,
        broadcast_id: String,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.go_live(job_id, &channel, &broadcast_id).await })
    }

    /// Called once a job has left `Live`, whatever the reason
    pub fn on_finished(
        self: &Arc<Self>,
        job_id: Uuid,
        channel: String,
        broadcast_id: String,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this
                .transition(&channel, &broadcast_id, BroadcastState::Complete)
                .await
            {
                this.annotate(job_id, BroadcastState::Complete, &e).await;
            }
        })
    }

    async fn go_live(&self, job_id: Uuid, channel: &str, broadcast_id: &str) {
        for (delay, state) in [
            (self.timing.settle, BroadcastState::Testing),
            (self.timing.step, BroadcastState::Live),
        ] {
            tokio::time::sleep(delay).await;

            if !self.job_is_live(job_id).await {
                tracing::debug!(
                    "Job {} left live before broadcast {} reached {}",
                    job_id,
                    broadcast_id,
                    state
                );
                return;
            }

            if let Err(e) = self.transition(channel, broadcast_id, state).await {
                self.annotate(job_id, state, &e).await;
                return;
            }
        }
    }

    /// Requests a transition, retrying once on transient failures
    ///
    /// A redundant transition means the broadcast is already there.
    async fn transition(
        &self,
        channel: &str,
        broadcast_id: &str,
        state: BroadcastState,
    ) -> Result<(), PlatformError> {
        let first = self.platform.transition(channel, broadcast_id, state).await;
        let result = match first {
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    "Transient failure moving broadcast {} to {}: {}, retrying",
                    broadcast_id,
                    state,
                    e
                );
                tokio::time::sleep(self.timing.retry_backoff).await;
                self.platform.transition(channel, broadcast_id, state).await
            }
            other => other,
        };

        match result {
            Ok(()) => {
                tracing::info!("Broadcast {} is now {}", broadcast_id, state);
                Ok(())
            }
            Err(PlatformError::RedundantTransition(_)) => {
                tracing::debug!("Broadcast {} already {}", broadcast_id, state);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn job_is_live(&self, job_id: Uuid) -> bool {
        match self.registry.get(job_id).await {
            Ok(Some(job)) => job.is_live(),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Cannot read registry for job {}: {}", job_id, e);
                false
            }
        }
    }

    async fn annotate(&self, job_id: Uuid, state: BroadcastState, err: &PlatformError) {
        tracing::warn!(
            "Broadcast transition to {} failed for job {}: {}",
            state,
            job_id,
            err
        );
        let note = format!("broadcast transition to {} failed: {}", state, err);
        if let Err(e) = self.registry.annotate(job_id, note).await {
            tracing::error!("Failed to annotate job {}: {}", job_id, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::platform::IngestStream;
    use async_trait::async_trait;
    use livecast_core::domain::job::{Job, JobStatus};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory platform that records calls and replays scripted failures
    #[derive(Default)]
    pub(crate) struct FakePlatform {
        pub calls: Mutex<Vec<String>>,
        pub failures: Mutex<VecDeque<PlatformError>>,
    }

    impl FakePlatform {
        pub fn fail_next(&self, err: PlatformError) {
            self.failures.lock().unwrap().push_back(err);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) -> Result<(), PlatformError> {
            self.calls.lock().unwrap().push(call);
            match self.failures.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl BroadcastPlatform for FakePlatform {
        fn channels(&self) -> std::io::Result<Vec<String>> {
            Ok(vec!["default".to_string(), "main".to_string()])
        }

        async fn create_broadcast(
            &self,
            channel: &str,
            broadcast: &NewBroadcast,
        ) -> Result<String, PlatformError> {
            self.record(format!("create_broadcast {} {}", channel, broadcast.title))?;
            Ok("b-1".to_string())
        }

        async fn create_stream(
            &self,
            channel: &str,
            _title: &str,
        ) -> Result<IngestStream, PlatformError> {
            self.record(format!("create_stream {}", channel))?;
            Ok(IngestStream {
                id: "s-1".to_string(),
                stream_key: "wxyz-9876".to_string(),
            })
        }

        async fn bind_stream(
            &self,
            _channel: &str,
            broadcast_id: &str,
            stream_id: &str,
        ) -> Result<(), PlatformError> {
            self.record(format!("bind {} {}", broadcast_id, stream_id))
        }

        async fn transition(
            &self,
            _channel: &str,
            broadcast_id: &str,
            state: BroadcastState,
        ) -> Result<(), PlatformError> {
            self.record(format!("transition {} {}", broadcast_id, state))
        }
    }

    pub(crate) fn fast_timing() -> BroadcastTiming {
        BroadcastTiming {
            settle: Duration::from_millis(10),
            step: Duration::from_millis(10),
            retry_backoff: Duration::from_millis(10),
        }
    }

    async fn setup(
        status: JobStatus,
    ) -> (
        tempfile::TempDir,
        Arc<JobRegistry>,
        Arc<FakePlatform>,
        Arc<BroadcastCoordinator>,
        Uuid,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(JobRegistry::new(dir.path().join("jobs.json")));
        let mut job = Job::new("demo.mp4", "abcd1234");
        job.status = status;
        job.remote_broadcast_id = Some("b-1".to_string());
        let id = job.id;
        registry.save(&[job]).await.unwrap();

        let platform = Arc::new(FakePlatform::default());
        let coordinator = Arc::new(BroadcastCoordinator::new(
            platform.clone(),
            registry.clone(),
            fast_timing(),
        ));
        (dir, registry, platform, coordinator, id)
    }

    #[tokio::test]
    async fn test_started_goes_testing_then_live() {
        let (_dir, _registry, platform, coordinator, id) = setup(JobStatus::Live).await;

        coordinator
            .on_started(id, "default".to_string(), "b-1".to_string())
            .await
            .unwrap();

        assert_eq!(
            platform.calls(),
            vec!["transition b-1 testing", "transition b-1 live"]
        );
    }

    #[tokio::test]
    async fn test_started_aborts_when_job_no_longer_live() {
        let (_dir, _registry, platform, coordinator, id) = setup(JobStatus::Stopped).await;

        coordinator
            .on_started(id, "default".to_string(), "b-1".to_string())
            .await
            .unwrap();

        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let (_dir, registry, platform, coordinator, id) = setup(JobStatus::Stopped).await;
        platform.fail_next(PlatformError::RedundantTransition("already complete".to_string()));

        coordinator
            .on_finished(id, "default".to_string(), "b-1".to_string())
            .await
            .unwrap();

        assert_eq!(platform.calls(), vec!["transition b-1 complete"]);
        let job = registry.get(id).await.unwrap().unwrap();
        assert!(job.annotation.is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let (_dir, registry, platform, coordinator, id) = setup(JobStatus::Completed).await;
        platform.fail_next(PlatformError::Unavailable {
            status: 503,
            message: "backend".to_string(),
        });

        coordinator
            .on_finished(id, "default".to_string(), "b-1".to_string())
            .await
            .unwrap();

        assert_eq!(platform.calls().len(), 2);
        assert!(registry.get(id).await.unwrap().unwrap().annotation.is_none());
    }

    #[tokio::test]
    async fn test_permanent_failure_annotates_without_status_change() {
        let (_dir, registry, platform, coordinator, id) = setup(JobStatus::Live).await;
        platform.fail_next(PlatformError::NotFound("b-1".to_string()));

        coordinator
            .on_started(id, "default".to_string(), "b-1".to_string())
            .await
            .unwrap();

        // No retry and no attempt at `live` after the failed `testing`
        assert_eq!(platform.calls(), vec!["transition b-1 testing"]);
        let job = registry.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Live);
        assert!(job.annotation.unwrap().contains("testing"));
    }

    #[tokio::test]
    async fn test_provision_binds_stream() {
        let (_dir, _registry, platform, coordinator, _id) = setup(JobStatus::Waiting).await;
        let request = BroadcastRequest {
            title: "Morning show".to_string(),
            description: String::new(),
            privacy: Default::default(),
        };
        let start = DateTime::parse_from_rfc3339("2026-03-10T21:30:00+07:00").unwrap();

        let provisioned = coordinator.provision("main", &request, start).await.unwrap();

        assert_eq!(provisioned.broadcast_id, "b-1");
        assert_eq!(provisioned.stream_key, "wxyz-9876");
        assert_eq!(
            platform.calls(),
            vec![
                "create_broadcast main Morning show",
                "create_stream main",
                "bind b-1 s-1"
            ]
        );
    }
}
