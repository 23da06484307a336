//! Error types for the engine gateway

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The engine could not be reached
    #[error("engine request failed: {0}")]
    EngineUnavailable(String),

    /// The engine answered with a non-success status
    #[error("engine responded with status {0}")]
    EngineStatus(StatusCode),

    /// The engine answered with its transient timeout envelope
    #[error("engine reported a timed out request")]
    EngineTimedOut,

    /// Every forwarding attempt failed
    #[error("engine request failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Schema introspection could not be produced
    #[error("introspection failed: {0}")]
    Introspection(String),

    /// Malformed auxiliary command
    #[error("{0}")]
    InvalidCommand(String),

    /// Invalid settings detected while building a component
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine process could not be started
    #[error("failed to launch query engine: {0}")]
    EngineLaunch(#[source] std::io::Error),

    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::EngineUnavailable(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            Self::Introspection(message) => {
                error!("Introspection failed: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "errors": [{ "message": "introspection failed" }] })),
                )
                    .into_response()
            }
            Self::InvalidCommand(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            other => {
                error!("Request failed: {}", other);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
