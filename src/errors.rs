use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::adapters::AdapterError;
use crate::engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".into()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };

        (
            status,
            Json(ErrorBody {
                success: false,
                error: message,
            }),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if crate::db::is_unique_violation(&e) {
            AppError::Conflict("resource already exists".into())
        } else {
            AppError::Internal(e.into())
        }
    }
}

impl From<AdapterError> for AppError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Auth(msg) => AppError::BadRequest(format!("authentication failed: {msg}")),
            AdapterError::NotConnected => AppError::BadRequest("account is not connected".into()),
            AdapterError::UnknownAdapter { platform, firm } => {
                AppError::BadRequest(format!("no adapter registered for {platform}/{firm}"))
            }
            AdapterError::Unexpected(msg) => AppError::BadRequest(msg),
            AdapterError::Transport(msg) => {
                AppError::Internal(anyhow::anyhow!("broker transport error: {msg}"))
            }
        }
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound => AppError::NotFound("copier not found".into()),
            EngineError::AlreadyRunning => AppError::Conflict("copier is already running".into()),
            EngineError::MasterNotConnected => {
                AppError::BadRequest("master account is not connected".into())
            }
            EngineError::NoActiveFollowers => {
                AppError::BadRequest("copier has no active follower configs".into())
            }
            EngineError::InvalidTransition { from, to } => {
                AppError::BadRequest(format!("invalid status transition: {from} -> {to}"))
            }
            EngineError::Adapter(e) => e.into(),
            EngineError::Internal(e) => AppError::Internal(e),
        }
    }
}
