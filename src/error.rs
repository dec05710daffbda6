//! Error handling for camstreamd

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Validation error (unknown control name, rejected value)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict (e.g. duplicate stream subscription for one connection)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Sensor / hardware failure
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Allocation failure while growing a buffer
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reachability target declared unreachable (escalated by the monitor)
    #[error("Target unreachable: {0}")]
    Unreachable(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            Error::Sensor(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SENSOR_ERROR",
                msg.clone(),
            ),
            Error::OutOfMemory(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "OUT_OF_MEMORY",
                msg.clone(),
            ),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Unreachable(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "UNREACHABLE",
                msg.clone(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
