//! Shared fixtures for vqa-review integration tests

#![allow(dead_code)]

use sqlx::SqlitePool;
use tempfile::TempDir;
use vqa_common::db::{init_database, ValidationResult};
use vqa_review::config::RuntimeSettings;
use vqa_review::results::NewValidationResult;
use vqa_review::AppState;

/// File-backed database that lives as long as the fixture
pub struct TestDb {
    _dir: TempDir,
    pub pool: SqlitePool,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("vqa.db")).await.unwrap();
        Self { _dir: dir, pool }
    }

    /// App state with default runtime settings
    pub fn state(&self) -> AppState {
        self.state_with(RuntimeSettings::default())
    }

    pub fn state_with(&self, settings: RuntimeSettings) -> AppState {
        AppState::new(self.pool.clone(), settings)
    }
}

/// Houndify passes, LLM fails: always lands in needs_review
pub fn disagreeing_result(language_code: Option<&str>, asr: Option<f64>) -> NewValidationResult {
    NewValidationResult {
        command_kind_match_score: Some(1.0),
        asr_confidence_score: asr,
        houndify_passed: Some(true),
        llm_passed: Some(false),
        language_code: language_code.map(str::to_string),
        ..Default::default()
    }
}

/// Record a needs_review result without admitting it
pub async fn record_uncertain(state: &AppState, language_code: Option<&str>) -> ValidationResult {
    state
        .recorder
        .record(disagreeing_result(language_code, Some(0.655)))
        .await
        .unwrap()
}
