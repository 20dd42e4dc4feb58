use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Malformed or out-of-bounds upstream data.
/// A snapshot-level failure rejects the whole snapshot; a pilot-level failure
/// only drops the pilot attachment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid timestamp '{0}' from birdnest API")]
    Timestamp(String),

    #[error("Invalid serial number '{0}' from birdnest API")]
    SerialNumber(String),

    #[error("Invalid coordinates '{x} {y}' for '{entity_id}' from birdnest API")]
    Coordinates { entity_id: String, x: f64, y: f64 },

    #[error("Invalid pilotId '{0}' from drone registry API")]
    PilotId(String),
}

/// Failure talking to an upstream collaborator. Aborts the current cycle only.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned status {status}")]
    Status { service: &'static str, status: u16 },

    #[error("{service} did not respond within {millis}ms")]
    Timeout { service: &'static str, millis: u128 },

    #[error("Could not decode {service} response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

/// The backing store rejected an atomic operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt record for '{key}': {message}")]
    Corrupt { key: String, message: String },
}

/// Anything that can make one poll cycle a no-op.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Store(e) => {
                tracing::error!("Store error: {e}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_ERROR",
                    "The drone store is unavailable".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
