//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::registry::RegistryError;
use crate::service::job_service::JobError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    BadGateway(String),
    RegistryError(RegistryError),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => {
                tracing::warn!("Platform error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::RegistryError(err) => {
                tracing::error!("Registry error: {}", err);
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError::RegistryError(err)
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => ApiError::NotFound(format!("Job {} not found", id)),
            JobError::ValidationError(msg) => ApiError::BadRequest(msg),
            JobError::SourceNotFound(_) => ApiError::BadRequest(err.to_string()),
            JobError::InvalidState(msg) => ApiError::Conflict(msg),
            JobError::JobStillLive(_) => ApiError::Conflict(err.to_string()),
            JobError::Platform(_) => ApiError::BadGateway(err.to_string()),
            JobError::Registry(err) => ApiError::RegistryError(err),
            JobError::SpawnFailure(_) | JobError::Internal(_) => {
                ApiError::InternalError(err.to_string())
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
