//! Error types for the broker

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Broker error taxonomy.
///
/// Payloads are plain strings so one failure can be handed to every
/// caller waiting on the same credential acquisition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Unknown/expired session or identity handshake failure. Aborts a workflow.
    #[error("Auth error: {0}")]
    Auth(String),

    /// Token exchange grant rejected. Aborts only the current step.
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// Planner failure or empty plan. Aborts a workflow.
    #[error("Planning error: {0}")]
    Planning(String),

    /// Agent invocation transport failure. Aborts only the current step.
    #[error("Step error: {0}")]
    Step(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Auth(e) => (StatusCode::UNAUTHORIZED, format!("Auth error: {}", e)),
            AppError::Exchange(e) => (StatusCode::FORBIDDEN, format!("Exchange error: {}", e)),
            AppError::Planning(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.clone()),
            AppError::Step(e) | AppError::Discovery(e) => {
                tracing::error!("Upstream error: {}", e);
                (StatusCode::BAD_GATEWAY, e.clone())
            }
            AppError::NotFound(e) => (StatusCode::NOT_FOUND, e.clone()),
            AppError::BadRequest(e) => (StatusCode::BAD_REQUEST, e.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Config(e) | AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.clone())
            }
        };

        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
