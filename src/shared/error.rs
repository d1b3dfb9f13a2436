//! Application Error Types
//!
//! Centralized error handling with Axum integration, plus the error taxonomy
//! of the real-time core.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },
}

/// Errors of the real-time distribution core.
///
/// Membership and auth failures reject a connection and are never retried.
/// Infrastructure failures are fatal to a single message only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Room {0} not found")]
    RoomNotFound(i64),

    #[error("Message broker unavailable")]
    BrokerUnavailable,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl ChatError {
    /// Stable code carried in client error frames.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Unauthenticated => "UNAUTHENTICATED",
            ChatError::InvalidToken => "INVALID_TOKEN",
            ChatError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            ChatError::BrokerUnavailable => "BROKER_UNAVAILABLE",
            ChatError::Persistence(_) => "PERSISTENCE_ERROR",
            ChatError::ConnectionClosed => "CONNECTION_CLOSED",
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

/// Field-level validation error
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Unauthenticated => AppError::Unauthorized("Invalid credentials".into()),
            ChatError::InvalidToken => AppError::Unauthorized("Invalid token".into()),
            ChatError::RoomNotFound(id) => AppError::NotFound(format!("Room {} not found", id)),
            ChatError::BrokerUnavailable => {
                AppError::Unavailable("Message broker unavailable".into())
            }
            ChatError::Persistence(msg) => AppError::Internal(msg),
            ChatError::ConnectionClosed => AppError::BadRequest("Connection closed".into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut errors = None;
        let (status, code, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 10001, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, 10002, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, 10003, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, 10005, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, 10006, msg),
            AppError::Validation {
                message,
                errors: fields,
            } => {
                errors = Some(fields);
                (StatusCode::BAD_REQUEST, 10007, message)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 10000, "Internal server error".into())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 10000, "Internal server error".into())
            }
        };

        let body = ErrorResponse {
            code,
            message,
            errors,
        };

        (status, Json(body)).into_response()
    }
}
