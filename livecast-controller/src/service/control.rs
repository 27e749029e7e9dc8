//! Control loop
//!
//! One activation is a reconciliation pass followed by a scheduler tick.
//! Activations come from API requests and from a periodic ticker; they are
//! serialized so reconciliation always finishes before the tick it precedes.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, error, info};

use crate::repository::registry::RegistryError;
use crate::service::reconcile::{ReconcileReport, Reconciler};
use crate::service::scheduler::{Scheduler, TickReport};

#[derive(Debug, Clone, Serialize)]
pub struct Activation {
    pub reconcile: ReconcileReport,
    pub tick: TickReport,
}

pub struct ControlLoop {
    reconciler: Reconciler,
    scheduler: Scheduler,
    activation: Mutex<()>,
}

impl ControlLoop {
    pub fn new(reconciler: Reconciler, scheduler: Scheduler) -> Self {
        Self {
            reconciler,
            scheduler,
            activation: Mutex::new(()),
        }
    }

    /// Runs one activation
    pub async fn activate(&self) -> Result<Activation, RegistryError> {
        let _guard = self.activation.lock().await;

        let reconcile = self.reconciler.run().await?;
        let tick = self.scheduler.tick().await?;

        Ok(Activation { reconcile, tick })
    }

    /// Activates every `interval` forever
    pub async fn run(self: Arc<Self>, interval: Duration) {
        info!("Starting control loop (interval: {:?})", interval);

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.activate().await {
                Ok(activation) => {
                    if activation.tick.started > 0 {
                        info!("Started {} scheduled job(s)", activation.tick.started);
                    } else {
                        debug!("Activation finished: {:?}", activation);
                    }
                }
                Err(e) => {
                    error!("Control loop activation failed: {}", e);
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::service::supervisor::tests::harness;
    use livecast_core::domain::job::{Job, JobStatus};

    #[tokio::test]
    async fn test_reconcile_runs_before_tick() {
        let h = harness("sleep 30");

        // A job that died with the previous controller and one waiting to start
        let mut crashed = Job::new(&h.source, "key-a");
        crashed.status = JobStatus::Live;
        crashed.process_handle = Some(u32::MAX - 1);
        let waiting = Job::new(&h.source, "key-b");
        h.registry
            .save(&[crashed.clone(), waiting.clone()])
            .await
            .unwrap();

        let control = ControlLoop::new(
            Reconciler::new(h.registry.clone(), h.tracking.clone(), h.supervisor.clone()),
            Scheduler::new(h.registry.clone(), h.supervisor.clone(), None),
        );

        let activation = control.activate().await.unwrap();

        assert_eq!(activation.reconcile.disconnected, 1);
        assert_eq!(activation.tick.started, 1);
        assert_eq!(
            h.registry.get(crashed.id).await.unwrap().unwrap().status,
            JobStatus::Disconnected
        );

        // The freshly started job is watched, so the next pass trusts it
        let activation = control.activate().await.unwrap();
        assert_eq!(activation.reconcile.trusted, 1);
        assert_eq!(activation.reconcile.disconnected, 0);

        h.supervisor.stop(waiting.id).await.unwrap();
    }
}
