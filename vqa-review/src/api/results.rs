//! Validation result endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vqa_common::db::{ValidationQueueEntry, ValidationResult};

use crate::error::ApiResult;
use crate::results::NewValidationResult;
use crate::AppState;

/// POST /api/results body
#[derive(Debug, Deserialize)]
pub struct RecordResultRequest {
    #[serde(flatten)]
    pub result: NewValidationResult,
    /// Routing flag for the queue entry, supplied by the producer
    #[serde(default)]
    pub requires_native_speaker: bool,
}

/// POST /api/results response
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordResultResponse {
    pub result: ValidationResult,
    /// Present when the result was admitted for human review
    pub queue_entry: Option<ValidationQueueEntry>,
}

/// POST /api/results
///
/// Records the result and admits it to the queue when it needs review.
/// Either both are stored or neither is.
pub async fn record_result(
    State(state): State<AppState>,
    Json(req): Json<RecordResultRequest>,
) -> ApiResult<(StatusCode, Json<RecordResultResponse>)> {
    let (result, queue_entry) = state
        .admission
        .record_and_admit(&state.recorder, req.result, req.requires_native_speaker)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RecordResultResponse {
            result,
            queue_entry,
        }),
    ))
}

/// GET /api/results/:id
pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ValidationResult>> {
    Ok(Json(state.recorder.get(id).await?))
}

pub fn result_routes() -> Router<AppState> {
    Router::new()
        .route("/api/results", post(record_result))
        .route("/api/results/:id", get(get_result))
}
