//! Error types for vqa-review
//!
//! `QueueError` is what the review core returns; `ApiError` maps it onto HTTP
//! responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;
use vqa_common::db::retry::AsLockError;
use vqa_common::db::QueueStatus;

/// Errors raised by the validation review core
///
/// All of these are recoverable by the caller. `AlreadyClaimed` is routine
/// under concurrency: pick another entry instead of retrying this one.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Referenced queue entry or validation result does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation requires a different current status
    #[error("Cannot {operation} entry {entry_id} while it is {status}")]
    InvalidTransition {
        entry_id: Uuid,
        status: QueueStatus,
        operation: &'static str,
    },

    /// Another validator won the claim
    #[error("Entry {entry_id} is already claimed")]
    AlreadyClaimed {
        entry_id: Uuid,
        claimed_by: Option<String>,
    },

    /// Release/complete attempted by someone other than the claim owner
    #[error("Entry {entry_id} is not claimed by {validator_id}")]
    NotClaimedByCaller { entry_id: Uuid, validator_id: String },

    /// Result already has a pending or claimed entry
    #[error("Validation result {validation_result_id} already has an active queue entry")]
    DuplicateAdmission { validation_result_id: Uuid },

    /// Caller supplied an out-of-range value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage, configuration or serialization failure
    #[error(transparent)]
    Common(#[from] vqa_common::Error),
}

impl QueueError {
    /// True for conditions callers should treat as normal, not as failure
    pub fn is_routine(&self) -> bool {
        matches!(self, QueueError::AlreadyClaimed { .. })
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Common(vqa_common::Error::Database(err))
    }
}

impl AsLockError for QueueError {
    fn is_lock_error(&self) -> bool {
        match self {
            QueueError::Common(err) => err.is_database_locked(),
            _ => false,
        }
    }
}

/// Result type for the review core
pub type QueueResult<T> = Result<T, QueueError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Review core error
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<vqa_common::Error> for ApiError {
    fn from(err: vqa_common::Error) -> Self {
        ApiError::Queue(QueueError::Common(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error_code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Queue(err) => match err {
                QueueError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                QueueError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "INVALID_TRANSITION")
                }
                QueueError::AlreadyClaimed { .. } => (StatusCode::CONFLICT, "ALREADY_CLAIMED"),
                QueueError::NotClaimedByCaller { .. } => {
                    (StatusCode::FORBIDDEN, "NOT_CLAIMED_BY_CALLER")
                }
                QueueError::DuplicateAdmission { .. } => {
                    (StatusCode::CONFLICT, "DUPLICATE_ADMISSION")
                }
                QueueError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
                QueueError::Common(vqa_common::Error::NotFound(_)) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND")
                }
                QueueError::Common(vqa_common::Error::InvalidInput(_)) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST")
                }
                QueueError::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
