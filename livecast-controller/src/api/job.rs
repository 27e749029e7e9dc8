//! Job API Handlers
//!
//! HTTP endpoints for job lifecycle management.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use livecast_core::dto::job::{CreateJob, JobSummary};
use livecast_core::dto::log::LogTail;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;

const DEFAULT_LOG_LINES: usize = 50;

// =============================================================================
// Job Lifecycle Endpoints
// =============================================================================

/// POST /api/jobs
/// Create a waiting job
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJob>,
) -> ApiResult<(StatusCode, Json<JobSummary>)> {
    tracing::info!("Creating job for source: {}", req.source.display());

    let job = state.jobs.create(req).await?;

    Ok((StatusCode::CREATED, Json(job.into())))
}

/// GET /api/jobs
/// List all jobs
///
/// Runs an activation first so the list reflects encoders that died and
/// schedules that came due since the last tick.
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<JobSummary>>> {
    tracing::debug!("Listing all jobs");

    state.control.activate().await?;
    let jobs = state.jobs.list().await?;

    Ok(Json(jobs.into_iter().map(JobSummary::from).collect()))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobSummary>> {
    tracing::debug!("Getting job: {}", id);

    let job = state.jobs.get(id).await?;

    Ok(Json(job.into()))
}

/// DELETE /api/jobs/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting job: {}", id);

    state.jobs.remove(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/jobs/{id}/start
/// Start a waiting job now, regardless of its schedule
pub async fn start_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobSummary>> {
    tracing::info!("Starting job: {}", id);

    let job = state.jobs.start(id).await?;

    Ok(Json(job.into()))
}

/// POST /api/jobs/{id}/stop
/// Stop a live job. Stopping a job that is not live is a no-op.
pub async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobSummary>> {
    tracing::info!("Stopping job: {}", id);

    let job = state.jobs.stop(id).await?;

    Ok(Json(job.into()))
}

/// POST /api/jobs/{id}/retry
/// Put a finished job back in the waiting queue
pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobSummary>> {
    tracing::info!("Retrying job: {}", id);

    let job = state.jobs.retry(id).await?;

    Ok(Json(job.into()))
}

// =============================================================================
// Log Endpoints
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub lines: Option<usize>,
}

/// GET /api/jobs/{id}/log?lines=N
/// Tail of the job's encoder log
pub async fn get_job_log(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<LogTail>> {
    let lines = query.lines.unwrap_or(DEFAULT_LOG_LINES);
    tracing::debug!("Getting last {} log lines of job {}", lines, id);

    let tail = state.jobs.log_tail(id, lines).await?;

    Ok(Json(tail))
}
