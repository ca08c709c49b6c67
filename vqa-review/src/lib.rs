//! vqa-review library - human validation review core
//!
//! Combines the automated validation signals into a decision, routes
//! uncertain results into the claimable review queue and serves both over
//! HTTP.

use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use vqa_common::events::EventBus;

pub mod admission;
pub mod api;
pub mod config;
pub mod decision;
pub mod error;
pub mod queue;
pub mod results;
pub mod routing;

use admission::Admission;
use config::RuntimeSettings;
use queue::{ClaimCoordinator, QueueRepository};
use results::ResultRecorder;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub settings: RuntimeSettings,
    pub events: EventBus,
    pub recorder: ResultRecorder,
    pub admission: Admission,
    pub coordinator: ClaimCoordinator,
}

impl AppState {
    /// Wire the review components over one pool and one event bus
    pub fn new(db: SqlitePool, settings: RuntimeSettings) -> Self {
        let events = EventBus::new(settings.event_bus_capacity);
        let repo = QueueRepository::new(
            db.clone(),
            settings.admission_mode,
            settings.max_lock_wait_ms,
        );
        let recorder = ResultRecorder::new(
            db.clone(),
            settings.thresholds,
            events.clone(),
            settings.max_lock_wait_ms,
        );
        let admission = Admission::new(
            repo.clone(),
            settings.priority_policy.clone(),
            events.clone(),
        );
        let coordinator = ClaimCoordinator::new(repo, events.clone());

        Self {
            db,
            settings,
            events,
            recorder,
            admission,
            coordinator,
        }
    }

    pub fn repository(&self) -> &QueueRepository {
        self.coordinator.repository()
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::result_routes())
        .merge(api::queue_routes())
        .merge(api::sse_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
