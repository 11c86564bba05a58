//! Error types for the session API.
//!
//! [`ApiError`] unifies all failure modes into a single enum that
//! can be converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.
//! Engine errors map onto status codes so clients can tell a refused
//! action (`403`, `409`) from a bad request (`400`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use brigade_core::engine::EngineError;
use brigade_core::review::ReviewError;
use brigade_core::scheduler::ScheduleError;
use brigade_core::tasks::TaskError;
use brigade_sync::SyncError;

/// Errors that can occur in the session API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Session headers are missing or malformed.
    #[error("missing session: {0}")]
    MissingSession(String),

    /// The caller's role may not perform the action.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The action conflicts with the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A backing store is unavailable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The engine loop is not attached to this server.
    #[error("run control not available")]
    NoRunControl,
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::Review(ReviewError::Forbidden { .. }) => Self::Forbidden(message),
            EngineError::Review(ReviewError::Task(
                TaskError::UnknownTask(_) | TaskError::UnknownDefinition(_),
            ))
            | EngineError::Schedule(ScheduleError::UnknownPeriod(_)) => Self::NotFound(message),
            EngineError::Review(
                ReviewError::Task(TaskError::InvalidTransition { .. })
                | ReviewError::AlreadyClosed(_),
            )
            | EngineError::Schedule(ScheduleError::NotActive(_)) => Self::Conflict(message),
            EngineError::Review(ReviewError::EvidenceUpload(_)) | EngineError::Persist(_) => {
                Self::Unavailable(message)
            }
            EngineError::Review(ReviewError::Task(TaskError::EmptyReason))
            | EngineError::Clock(_)
            | EngineError::Schedule(ScheduleError::Clock(_))
            | EngineError::Catalog(_) => Self::InvalidRequest(message),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::MissingSession(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoRunControl => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
