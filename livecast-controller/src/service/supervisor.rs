//! Process Supervisor
//!
//! Owns the encoder process of every live job. `start` spawns the encoder
//! and persists `Live` before returning, a monitor task waits for the
//! process and records how it ended, and `stop` terminates the process
//! group. Those three are the only ways a job enters or leaves `Live`
//! besides reconciliation of encoders that died unobserved.

use chrono::Utc;
use livecast_core::domain::job::{Job, JobStatus};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Child;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::encoder::classify::{self, ExitKind};
use crate::encoder::{self, LOG_TAIL_BYTES};
use crate::process::{self, ProcessProbe, Signal};
use crate::repository::registry::{JobRegistry, RegistryError};
use crate::repository::tracking::{PidMarker, TrackingStore};
use crate::service::broadcast::BroadcastCoordinator;

/// How often `stop` checks whether the encoder has exited
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Supervisor error type
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("source file {} does not exist", .0.display())]
    SourceNotFound(PathBuf),

    #[error("failed to spawn encoder: {0}")]
    SpawnFailure(String),

    #[error("job {id} is {status}")]
    InvalidState { id: Uuid, status: JobStatus },

    #[error("failed to signal encoder: {0}")]
    Signal(#[source] std::io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Watch {
    /// Spawned by this controller and not yet reaped
    Child,
    /// Found running after a restart
    Adopted,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub program: String,
    pub ingest_url: String,
    pub log_dir: PathBuf,
    pub stop_grace: Duration,
    pub adopt_poll_interval: Duration,
}

pub struct Supervisor {
    registry: Arc<JobRegistry>,
    tracking: Arc<TrackingStore>,
    probe: Arc<dyn ProcessProbe>,
    broadcasts: Arc<BroadcastCoordinator>,
    settings: SupervisorSettings,
    /// Jobs that currently have a monitor or an adoption watcher
    watched: Mutex<HashMap<Uuid, Watch>>,
    /// Jobs inside `stop`, whose exit the monitor must not classify
    stopping: Mutex<HashSet<Uuid>>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<JobRegistry>,
        tracking: Arc<TrackingStore>,
        probe: Arc<dyn ProcessProbe>,
        broadcasts: Arc<BroadcastCoordinator>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            registry,
            tracking,
            probe,
            broadcasts,
            settings,
            watched: Mutex::new(HashMap::new()),
            stopping: Mutex::new(HashSet::new()),
        }
    }

    pub fn broadcasts(&self) -> &Arc<BroadcastCoordinator> {
        &self.broadcasts
    }

    /// Encoder log of a job
    pub fn log_path(&self, job_id: Uuid) -> PathBuf {
        self.settings.log_dir.join(format!("{}.log", job_id))
    }

    /// Starts the encoder of a waiting job
    ///
    /// The status check, spawn and the write of `Live` happen inside one
    /// registry update, so of two concurrent starts exactly one spawns and
    /// the other gets `InvalidState`. The job is registered as watched
    /// before `Live` is written and the watch lock is held until the write
    /// settles, so reconciliation never sees a live child unwatched.
    pub async fn start(self: &Arc<Self>, job_id: Uuid) -> Result<Job, SupervisorError> {
        let mut spawned: Option<Child> = None;
        let settings = &self.settings;
        let log_path = self.log_path(job_id);

        let mut watched = self.watched.lock().await;
        let previous = watched.insert(job_id, Watch::Child);

        let result = self
            .registry
            .update(|jobs| {
                let job = jobs
                    .iter_mut()
                    .find(|job| job.id == job_id)
                    .ok_or(SupervisorError::NotFound(job_id))?;

                if job.status != JobStatus::Waiting {
                    return Err(SupervisorError::InvalidState {
                        id: job_id,
                        status: job.status.clone(),
                    });
                }

                if !job.source.is_file() {
                    return Err(SupervisorError::SourceNotFound(job.source.clone()));
                }

                let invocation =
                    encoder::build_invocation(&settings.program, &settings.ingest_url, job);
                tracing::info!("Starting encoder for job {}: {}", job_id, invocation);

                let child = invocation
                    .spawn(&log_path)
                    .map_err(|e| SupervisorError::SpawnFailure(e.to_string()))?;
                let pid = child.id().ok_or_else(|| {
                    SupervisorError::SpawnFailure("encoder exited immediately".to_string())
                })?;
                spawned = Some(child);

                job.status = JobStatus::Live;
                job.process_handle = Some(pid);
                job.started_at = Some(Utc::now());
                job.ended_at = None;
                job.annotation = None;
                Ok(job.clone())
            })
            .await;

        let job = match result {
            Ok(job) => job,
            Err(e) => {
                Self::restore_watch(&mut watched, job_id, previous);
                drop(watched);
                // Spawned but `Live` never reached disk: the process must not outlive this call
                if let Some(child) = spawned.take() {
                    tracing::error!("Killing encoder of job {} after failed persist: {}", job_id, e);
                    Self::discard(child);
                }
                return Err(e);
            }
        };

        let (Some(child), Some(pid)) = (spawned, job.process_handle) else {
            Self::restore_watch(&mut watched, job_id, previous);
            return Err(SupervisorError::SpawnFailure(
                "encoder handle was lost".to_string(),
            ));
        };

        let marker = PidMarker {
            pid,
            program: self.settings.program.clone(),
            started_at: self.probe.inspect(pid).map(|info| info.start_time),
        };
        if let Err(e) = self.tracking.write(job_id, &marker, &JobStatus::Live) {
            tracing::warn!("Failed to write tracking files for job {}: {:#}", job_id, e);
        }

        drop(watched);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.monitor(job_id, pid, child).await });

        tracing::info!("Job {} is live (pid {})", job_id, pid);

        if let Some(broadcast_id) = &job.remote_broadcast_id {
            self.broadcasts
                .on_started(job_id, job.channel.clone(), broadcast_id.clone());
        }

        Ok(job)
    }

    /// Stops a live job
    ///
    /// Stopping a job that is not live succeeds and changes nothing.
    pub async fn stop(&self, job_id: Uuid) -> Result<Job, SupervisorError> {
        let job = self
            .registry
            .get(job_id)
            .await?
            .ok_or(SupervisorError::NotFound(job_id))?;

        if !job.is_live() {
            tracing::debug!("Stop requested for job {} in state {}", job_id, job.status);
            return Ok(job);
        }

        self.stopping.lock().await.insert(job_id);
        let result = self.stop_live(job_id, job.process_handle).await;
        self.stopping.lock().await.remove(&job_id);

        result
    }

    async fn stop_live(&self, job_id: Uuid, pid: Option<u32>) -> Result<Job, SupervisorError> {
        if let Some(pid) = pid {
            // An unreaped child's pid cannot have been recycled
            let own_child = self.watched.lock().await.get(&job_id) == Some(&Watch::Child);
            let marker = self.marker_for(job_id, pid);
            if own_child || self.verify_encoder(&marker) {
                self.terminate(pid).await?;
            } else {
                tracing::info!("Encoder of job {} (pid {}) is already gone", job_id, pid);
            }
        }

        let job = self
            .registry
            .update(|jobs| {
                let job = jobs
                    .iter_mut()
                    .find(|job| job.id == job_id)
                    .ok_or(SupervisorError::NotFound(job_id))?;
                if job.is_live() {
                    job.finish(JobStatus::Stopped);
                }
                Ok::<_, SupervisorError>(job.clone())
            })
            .await?;

        if let Err(e) = self.tracking.remove(job_id) {
            tracing::warn!("Failed to remove tracking files for job {}: {:#}", job_id, e);
        }

        tracing::info!("Job {} stopped ({})", job_id, job.status);

        if let Some(broadcast_id) = &job.remote_broadcast_id {
            self.broadcasts
                .on_finished(job_id, job.channel.clone(), broadcast_id.clone());
        }

        Ok(job)
    }

    /// SIGTERM to the group, SIGKILL once the grace period is over
    async fn terminate(&self, pid: u32) -> Result<(), SupervisorError> {
        process::signal_group(pid, Signal::Terminate).map_err(SupervisorError::Signal)?;

        let deadline = Instant::now() + self.settings.stop_grace;
        while Instant::now() < deadline {
            if self.probe.inspect(pid).is_none() {
                return Ok(());
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        tracing::warn!(
            "Encoder pid {} ignored SIGTERM for {:?}, killing",
            pid,
            self.settings.stop_grace
        );
        process::signal_group(pid, Signal::Kill).map_err(SupervisorError::Signal)
    }

    /// Whether the marker's pid is running the encoder it describes
    pub fn verify_encoder(&self, marker: &PidMarker) -> bool {
        self.probe
            .inspect(marker.pid)
            .is_some_and(|info| process::is_encoder(&info, marker, &self.settings.program))
    }

    /// The recorded marker for a job, or a bare one for `pid`
    pub fn marker_for(&self, job_id: Uuid, pid: u32) -> PidMarker {
        match self.tracking.read_pid(job_id) {
            Ok(Some(marker)) if marker.pid == pid => marker,
            Ok(_) => PidMarker {
                pid,
                program: self.settings.program.clone(),
                started_at: None,
            },
            Err(e) => {
                tracing::warn!("Unreadable pid marker for job {}: {:#}", job_id, e);
                PidMarker {
                    pid,
                    program: self.settings.program.clone(),
                    started_at: None,
                }
            }
        }
    }

    pub async fn is_watched(&self, job_id: Uuid) -> bool {
        self.watched.lock().await.contains_key(&job_id)
    }

    /// Watches an encoder that survived a controller restart
    ///
    /// The process is not our child, so its exit is detected by polling and
    /// its exit code is unknown.
    pub async fn adopt(self: &Arc<Self>, job_id: Uuid, marker: PidMarker) {
        {
            let mut watched = self.watched.lock().await;
            if watched.contains_key(&job_id) {
                return;
            }
            watched.insert(job_id, Watch::Adopted);
        }

        tracing::info!("Adopting encoder of job {} (pid {})", job_id, marker.pid);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(this.settings.adopt_poll_interval).await;
                if !this.verify_encoder(&marker) {
                    break;
                }
            }
            this.finish_exited(job_id, marker.pid, ExitKind::Unknown)
                .await;
        });
    }

    async fn monitor(self: Arc<Self>, job_id: Uuid, pid: u32, mut child: Child) {
        let exit = match child.wait().await {
            Ok(status) => {
                tracing::debug!("Encoder of job {} exited: {}", job_id, status);
                ExitKind::from(status)
            }
            Err(e) => {
                tracing::warn!("Failed to wait for encoder of job {}: {}", job_id, e);
                ExitKind::Unknown
            }
        };
        self.finish_exited(job_id, pid, exit).await;
    }

    /// Records the terminal status of an encoder that exited on its own
    async fn finish_exited(&self, job_id: Uuid, pid: u32, exit: ExitKind) {
        self.watched.lock().await.remove(&job_id);

        if self.stopping.lock().await.contains(&job_id) {
            tracing::debug!("Encoder of job {} exited during stop", job_id);
            return;
        }

        let tail = match encoder::read_log_tail(&self.log_path(job_id), LOG_TAIL_BYTES) {
            Ok(tail) => tail,
            Err(e) => {
                tracing::warn!("Cannot read encoder log of job {}: {}", job_id, e);
                String::new()
            }
        };
        let status: JobStatus = classify::classify(exit, &tail).into();

        let finished = self
            .registry
            .update(|jobs| match jobs.iter_mut().find(|job| job.id == job_id) {
                Some(job) if job.is_live() && job.process_handle == Some(pid) => {
                    job.finish(status);
                    Ok(Some(job.clone()))
                }
                _ => Ok::<_, RegistryError>(None),
            })
            .await;

        match finished {
            Ok(Some(job)) => {
                tracing::info!("Job {} ended: {}", job_id, job.status);
                if let Err(e) = self.tracking.remove(job_id) {
                    tracing::warn!("Failed to remove tracking files for job {}: {:#}", job_id, e);
                }
                if let Some(broadcast_id) = &job.remote_broadcast_id {
                    self.broadcasts
                        .on_finished(job_id, job.channel.clone(), broadcast_id.clone());
                }
            }
            Ok(None) => {
                tracing::debug!("Job {} was no longer live with pid {}", job_id, pid);
            }
            Err(e) => {
                tracing::error!("Failed to record exit of job {}: {}", job_id, e);
            }
        }
    }

    fn restore_watch(watched: &mut HashMap<Uuid, Watch>, job_id: Uuid, previous: Option<Watch>) {
        match previous {
            Some(watch) => {
                watched.insert(job_id, watch);
            }
            None => {
                watched.remove(&job_id);
            }
        }
    }

    fn discard(mut child: Child) {
        if let Some(pid) = child.id() {
            if let Err(e) = process::signal_group(pid, Signal::Kill) {
                tracing::warn!("Failed to kill encoder pid {}: {}", pid, e);
            }
        }
        if let Err(e) = child.start_kill() {
            tracing::debug!("start_kill after group kill: {}", e);
        }
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
    }
}
