//! API error types and conversions

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::monitor::MonitorError;
use crate::storage::StorageError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Storage operation failed
    StorageError(String),

    /// Invalid request parameters
    InvalidRequest(String),

    /// Resource not found
    NotFound(String),

    /// Safety abort or an operation already in progress
    Conflict(String),

    /// The registry could not be reached
    BadGateway(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::StorageError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::StorageError(err.to_string())
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        let message = err.to_string();
        match err {
            MonitorError::SafetyAbort { .. } | MonitorError::CheckInProgress { .. } => {
                ApiError::Conflict(message)
            }
            MonitorError::NotFound { .. } => ApiError::NotFound(message),
            MonitorError::Registry(_) => ApiError::BadGateway(message),
            MonitorError::Storage(_) => ApiError::StorageError(message),
        }
    }
}
