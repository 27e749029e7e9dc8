//! System API Handlers
//!
//! Controller-wide views and the manual activation trigger.

use axum::{Json, extract::State};
use livecast_core::dto::media::{ChannelList, VideoFile};
use livecast_core::dto::status::StatusSummary;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::control::Activation;

/// GET /api/status
/// Job counts overall and per channel
pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusSummary>> {
    state.control.activate().await?;
    let summary = state.jobs.status_summary().await?;

    Ok(Json(summary))
}

/// POST /api/activate
/// Run one reconciliation pass and scheduler tick now
pub async fn activate(State(state): State<AppState>) -> ApiResult<Json<Activation>> {
    tracing::debug!("Manual activation requested");

    let activation = state.control.activate().await?;

    Ok(Json(activation))
}

/// GET /api/videos
pub async fn list_videos(State(state): State<AppState>) -> ApiResult<Json<Vec<VideoFile>>> {
    Ok(Json(state.jobs.list_videos()?))
}

/// GET /api/channels
pub async fn list_channels(State(state): State<AppState>) -> ApiResult<Json<ChannelList>> {
    Ok(Json(state.jobs.channels()?))
}
