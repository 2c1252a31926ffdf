use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cadence_broker::BrokerError;
use cadence_scheduler::SchedulerError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Everything a handler can fail with, mapped onto a status code and a small
/// JSON body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    /// The job already has a run in flight.
    #[error("already running")]
    AlreadyRunning,

    #[error("invalid token")]
    Unauthorized,

    /// The request body could not be read as the expected JSON.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Unavailable(String),

    /// Details are logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::JobNotFound { .. } => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::TokenInvalid => ApiError::Unauthorized,
            BrokerError::Disabled => ApiError::Unavailable("broker disabled".to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({ "error": "not found" })),
            ApiError::AlreadyRunning => (
                StatusCode::CONFLICT,
                json!({ "message": "already running" }),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "invalid token" }),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": msg }))
            }
            ApiError::Internal(msg) => {
                error!("request failed: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
