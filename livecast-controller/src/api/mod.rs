//! API Module
//!
//! HTTP API layer for the controller.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod system;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::control::ControlLoop;
use crate::service::job_service::JobService;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
    pub control: Arc<ControlLoop>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/api/jobs", get(job::list_jobs).post(job::create_job))
        .route("/api/jobs/{id}", get(job::get_job).delete(job::delete_job))
        .route("/api/jobs/{id}/start", post(job::start_job))
        .route("/api/jobs/{id}/stop", post(job::stop_job))
        .route("/api/jobs/{id}/retry", post(job::retry_job))
        .route("/api/jobs/{id}/log", get(job::get_job_log))
        // System endpoints
        .route("/api/status", get(system::get_status))
        .route("/api/activate", post(system::activate))
        .route("/api/videos", get(system::list_videos))
        .route("/api/channels", get(system::list_channels))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
