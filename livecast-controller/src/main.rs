use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod encoder;
pub mod platform;
pub mod process;
pub mod repository;
pub mod service;

use config::Config;
use platform::YouTubePlatform;
use process::SystemProbe;
use repository::registry::JobRegistry;
use repository::tracking::TrackingStore;
use service::broadcast::{BroadcastCoordinator, BroadcastTiming};
use service::control::ControlLoop;
use service::job_service::JobService;
use service::reconcile::Reconciler;
use service::scheduler::Scheduler;
use service::supervisor::{Supervisor, SupervisorSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livecast_controller=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Livecast Controller...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    std::fs::create_dir_all(&config.state_dir).with_context(|| {
        format!(
            "Failed to create state directory {}",
            config.state_dir.display()
        )
    })?;

    tracing::info!("State directory: {}", config.state_dir.display());
    tracing::info!("Encoder: {} -> {}", config.encoder_program, config.ingest_url);
    match config.schedule_offset {
        Some(offset) => tracing::info!("Schedule timezone: UTC{}", offset),
        None => tracing::info!("Schedule timezone: host local time"),
    }

    let registry = Arc::new(JobRegistry::new(config.registry_path()));
    let tracking = Arc::new(TrackingStore::new(config.tracking_dir()));

    let platform = Arc::new(YouTubePlatform::new(
        config.platform_url.clone(),
        config.token_dir.clone(),
    ));
    let broadcasts = Arc::new(BroadcastCoordinator::new(
        platform,
        registry.clone(),
        BroadcastTiming {
            settle: config.broadcast_settle,
            step: config.broadcast_step,
            retry_backoff: config.broadcast_retry_backoff,
        },
    ));

    let supervisor = Arc::new(Supervisor::new(
        registry.clone(),
        tracking.clone(),
        Arc::new(SystemProbe),
        broadcasts,
        SupervisorSettings {
            program: config.encoder_program.clone(),
            ingest_url: config.ingest_url.clone(),
            log_dir: config.log_dir(),
            stop_grace: config.stop_grace,
            adopt_poll_interval: config.adopt_poll_interval,
        },
    ));

    let control = Arc::new(ControlLoop::new(
        Reconciler::new(registry.clone(), tracking.clone(), supervisor.clone()),
        Scheduler::new(registry.clone(), supervisor.clone(), config.schedule_offset),
    ));
    let jobs = Arc::new(JobService::new(
        registry,
        tracking,
        supervisor,
        config.media_dir.clone(),
        config.schedule_offset,
    ));

    // Recover encoders left by a previous run before serving anything.
    // A registry that cannot be read stops the controller here.
    let activation = control
        .activate()
        .await
        .context("Initial reconciliation failed")?;
    tracing::info!(
        "Recovered state: {} checked, {} adopted, {} disconnected, {} started",
        activation.reconcile.checked,
        activation.reconcile.adopted,
        activation.reconcile.disconnected,
        activation.tick.started
    );

    tokio::spawn(control.clone().run(config.tick_interval));

    // Build router with all API endpoints
    let app = api::create_router(api::AppState { jobs, control });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
