//! Review queue endpoints
//!
//! Thin wrappers over `QueueRepository` reads and `ClaimCoordinator`
//! transitions. No queue logic lives here.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use vqa_common::db::ValidationQueueEntry;

use crate::error::{ApiError, ApiResult};
use crate::queue::{PageCursor, PageRequest, PendingFilter, QueueStats};
use crate::routing::{PriorityBand, ValidatorProfile};
use crate::AppState;

/// Query parameters for GET /api/queue/pending
#[derive(Debug, Default, Deserialize)]
pub struct PendingQuery {
    pub language_code: Option<String>,
    pub requires_native_speaker: Option<bool>,
    pub min_priority: Option<u8>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

/// Queue entry with its display band
#[derive(Debug, Serialize, Deserialize)]
pub struct QueueEntryView {
    #[serde(flatten)]
    pub entry: ValidationQueueEntry,
    pub band: PriorityBand,
}

impl From<ValidationQueueEntry> for QueueEntryView {
    fn from(entry: ValidationQueueEntry) -> Self {
        Self {
            band: PriorityBand::from_priority(entry.priority),
            entry,
        }
    }
}

/// GET /api/queue/pending response
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingResponse {
    pub entries: Vec<QueueEntryView>,
    /// Pass back as `cursor` to fetch the next page
    pub next_cursor: Option<String>,
}

/// Body of claim/release/complete requests
#[derive(Debug, Deserialize)]
pub struct ValidatorRequest {
    pub validator_id: String,
}

/// GET /api/queue/pending
pub async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> ApiResult<Json<PendingResponse>> {
    let filter = PendingFilter {
        language_code: query.language_code.filter(|l| !l.trim().is_empty()),
        requires_native_speaker: query.requires_native_speaker,
        min_priority: query.min_priority,
    };
    let after = query
        .cursor
        .as_deref()
        .map(PageCursor::decode)
        .transpose()?;
    let page = PageRequest {
        limit: query.limit.unwrap_or(state.settings.page_size),
        after,
    };

    let page = state.repository().list_pending(&filter, &page).await?;
    debug!(returned = page.entries.len(), "GET /api/queue/pending");

    Ok(Json(PendingResponse {
        entries: page.entries.into_iter().map(QueueEntryView::from).collect(),
        next_cursor: page.next.map(|c| c.encode()),
    }))
}

/// GET /api/queue/stats
pub async fn queue_stats(State(state): State<AppState>) -> ApiResult<Json<QueueStats>> {
    Ok(Json(state.repository().count_by_status().await?))
}

/// GET /api/queue/:id
pub async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<QueueEntryView>> {
    Ok(Json(state.repository().get(id).await?.into()))
}

/// POST /api/queue/:id/claim
pub async fn claim_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ValidatorRequest>,
) -> ApiResult<Json<QueueEntryView>> {
    let entry = state.coordinator.claim(id, &req.validator_id).await?;
    Ok(Json(entry.into()))
}

/// POST /api/queue/:id/release
pub async fn release_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ValidatorRequest>,
) -> ApiResult<Json<QueueEntryView>> {
    let entry = state.coordinator.release(id, &req.validator_id).await?;
    Ok(Json(entry.into()))
}

/// POST /api/queue/:id/complete
pub async fn complete_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ValidatorRequest>,
) -> ApiResult<Json<QueueEntryView>> {
    let entry = state.coordinator.complete(id, &req.validator_id).await?;
    Ok(Json(entry.into()))
}

/// POST /api/queue/claim-next
///
/// 200 with the claimed entry, 204 when nothing eligible is pending.
pub async fn claim_next(
    State(state): State<AppState>,
    Json(validator): Json<ValidatorProfile>,
) -> ApiResult<Response> {
    if validator.validator_id.trim().is_empty() {
        return Err(ApiError::BadRequest("validator_id must not be empty".to_string()));
    }

    let claimed = state
        .coordinator
        .claim_next(&validator, &PendingFilter::default(), state.settings.page_size)
        .await?;

    Ok(match claimed {
        Some(entry) => Json(QueueEntryView::from(entry)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

pub fn queue_routes() -> Router<AppState> {
    Router::new()
        .route("/api/queue/pending", get(list_pending))
        .route("/api/queue/stats", get(queue_stats))
        .route("/api/queue/claim-next", post(claim_next))
        .route("/api/queue/:id", get(get_entry))
        .route("/api/queue/:id/claim", post(claim_entry))
        .route("/api/queue/:id/release", post(release_entry))
        .route("/api/queue/:id/complete", post(complete_entry))
}
