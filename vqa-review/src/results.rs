//! Validation result recording
//!
//! Results are written once and never updated. The decision columns are
//! always computed here from the stage signals; callers cannot supply them.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;
use vqa_common::db::{
    retry_on_lock, EnsembleResult, FinalDecision, HoundifyResult, ReviewStatus, ValidationResult,
};
use vqa_common::events::{EventBus, QueueEvent};
use vqa_common::time;

use crate::decision::{combine, DecisionThresholds};
use crate::error::{QueueError, QueueResult};

/// Automated stage output for one step execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewValidationResult {
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub suite_run_id: Option<Uuid>,
    #[serde(default)]
    pub multi_turn_execution_id: Option<Uuid>,
    #[serde(default)]
    pub step_execution_id: Option<Uuid>,
    #[serde(default)]
    pub expected_outcome_id: Option<Uuid>,
    #[serde(default)]
    pub command_kind_match_score: Option<f64>,
    #[serde(default)]
    pub asr_confidence_score: Option<f64>,
    #[serde(default)]
    pub houndify_passed: Option<bool>,
    #[serde(default)]
    pub houndify_result: Option<HoundifyResult>,
    #[serde(default)]
    pub llm_passed: Option<bool>,
    #[serde(default)]
    pub ensemble_result: Option<EnsembleResult>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl NewValidationResult {
    fn validate(&self) -> QueueResult<()> {
        if let Some(score) = self.command_kind_match_score {
            if score != 0.0 && score != 1.0 {
                return Err(QueueError::InvalidInput(format!(
                    "command_kind_match_score must be 0.0 or 1.0, got {}",
                    score
                )));
            }
        }
        if let Some(score) = self.asr_confidence_score {
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(QueueError::InvalidInput(format!(
                    "asr_confidence_score must be within 0.0..=1.0, got {}",
                    score
                )));
            }
        }
        Ok(())
    }
}

/// Persists validation results with their combined decision
#[derive(Clone)]
pub struct ResultRecorder {
    db: SqlitePool,
    thresholds: DecisionThresholds,
    events: EventBus,
    max_lock_wait_ms: u64,
}

impl ResultRecorder {
    pub fn new(
        db: SqlitePool,
        thresholds: DecisionThresholds,
        events: EventBus,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            thresholds,
            events,
            max_lock_wait_ms,
        }
    }

    pub fn thresholds(&self) -> &DecisionThresholds {
        &self.thresholds
    }

    /// Derive both stage signals, combine them and store the result
    pub async fn record(&self, new: NewValidationResult) -> QueueResult<ValidationResult> {
        let result = self.prepare(new)?;

        retry_on_lock("record_result", self.max_lock_wait_ms, || async {
            insert_result(&self.db, &result).await
        })
        .await?;

        self.announce(&result);
        Ok(result)
    }

    /// Validate the input and build the row with its computed decision
    ///
    /// Nothing is written; see [`insert_result`].
    pub(crate) fn prepare(&self, new: NewValidationResult) -> QueueResult<ValidationResult> {
        new.validate()?;

        let houndify_passed = self.thresholds.houndify_signal(
            new.houndify_passed,
            new.command_kind_match_score,
            new.asr_confidence_score,
        );
        let llm_passed = self
            .thresholds
            .llm_signal(new.llm_passed, new.ensemble_result.as_ref());
        let decision = combine(houndify_passed, llm_passed);

        Ok(ValidationResult {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            suite_run_id: new.suite_run_id,
            multi_turn_execution_id: new.multi_turn_execution_id,
            step_execution_id: new.step_execution_id,
            expected_outcome_id: new.expected_outcome_id,
            command_kind_match_score: new.command_kind_match_score,
            asr_confidence_score: new.asr_confidence_score,
            houndify_passed,
            houndify_result: new.houndify_result,
            llm_passed,
            ensemble_result: new.ensemble_result,
            final_decision: decision.final_decision,
            review_status: decision.review_status,
            language_code: new.language_code,
            created_at: time::now(),
        })
    }

    /// Log and publish a result once it is committed
    pub(crate) fn announce(&self, result: &ValidationResult) {
        info!(
            validation_result_id = %result.id,
            final_decision = %result.final_decision,
            review_status = %result.review_status,
            "Recorded validation result"
        );
        self.events.emit_lossy(QueueEvent::ResultRecorded {
            validation_result_id: result.id,
            final_decision: result.final_decision,
            review_status: result.review_status,
            timestamp: result.created_at,
        });
    }

    /// Fetch a stored result
    pub async fn get(&self, id: Uuid) -> QueueResult<ValidationResult> {
        let row = sqlx::query("SELECT * FROM validation_results WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.db)
            .await?;

        debug!(validation_result_id = %id, found = row.is_some(), "Loaded validation result");

        match row {
            Some(row) => result_from_row(&row),
            None => Err(QueueError::NotFound(format!("validation result {}", id))),
        }
    }
}

/// Insert a prepared result row on any executor
pub(crate) async fn insert_result<'e, E>(executor: E, result: &ValidationResult) -> QueueResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let houndify_json = result
        .houndify_result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(vqa_common::Error::from)?;
    let ensemble_json = result
        .ensemble_result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(vqa_common::Error::from)?;

    sqlx::query(
        r#"
        INSERT INTO validation_results (
            id, tenant_id, suite_run_id, multi_turn_execution_id,
            step_execution_id, expected_outcome_id,
            command_kind_match_score, asr_confidence_score,
            houndify_passed, houndify_result, llm_passed, ensemble_result,
            final_decision, review_status, language_code, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(result.id.to_string())
    .bind(result.tenant_id.map(|u| u.to_string()))
    .bind(result.suite_run_id.map(|u| u.to_string()))
    .bind(result.multi_turn_execution_id.map(|u| u.to_string()))
    .bind(result.step_execution_id.map(|u| u.to_string()))
    .bind(result.expected_outcome_id.map(|u| u.to_string()))
    .bind(result.command_kind_match_score)
    .bind(result.asr_confidence_score)
    .bind(result.houndify_passed)
    .bind(houndify_json)
    .bind(result.llm_passed)
    .bind(ensemble_json)
    .bind(result.final_decision.as_str())
    .bind(result.review_status.as_str())
    .bind(result.language_code.clone())
    .bind(time::to_db(&result.created_at))
    .execute(executor)
    .await?;

    Ok(())
}

fn optional_uuid(row: &SqliteRow, column: &str) -> QueueResult<Option<Uuid>> {
    let value: Option<String> = row.try_get(column)?;
    value
        .map(|s| {
            Uuid::parse_str(&s).map_err(|e| {
                QueueError::Common(vqa_common::Error::Internal(format!(
                    "Failed to parse {} '{}': {}",
                    column, s, e
                )))
            })
        })
        .transpose()
}

fn optional_json<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    column: &str,
) -> QueueResult<Option<T>> {
    let value: Option<String> = row.try_get(column)?;
    Ok(value
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(vqa_common::Error::from)?)
}

fn result_from_row(row: &SqliteRow) -> QueueResult<ValidationResult> {
    let final_decision: String = row.try_get("final_decision")?;
    let review_status: String = row.try_get("review_status")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(ValidationResult {
        id: optional_uuid(row, "id")?.ok_or_else(|| {
            QueueError::Common(vqa_common::Error::Internal("validation result without id".to_string()))
        })?,
        tenant_id: optional_uuid(row, "tenant_id")?,
        suite_run_id: optional_uuid(row, "suite_run_id")?,
        multi_turn_execution_id: optional_uuid(row, "multi_turn_execution_id")?,
        step_execution_id: optional_uuid(row, "step_execution_id")?,
        expected_outcome_id: optional_uuid(row, "expected_outcome_id")?,
        command_kind_match_score: row.try_get("command_kind_match_score")?,
        asr_confidence_score: row.try_get("asr_confidence_score")?,
        houndify_passed: row.try_get("houndify_passed")?,
        houndify_result: optional_json(row, "houndify_result")?,
        llm_passed: row.try_get("llm_passed")?,
        ensemble_result: optional_json(row, "ensemble_result")?,
        final_decision: FinalDecision::parse(&final_decision)?,
        review_status: ReviewStatus::parse(&review_status)?,
        language_code: row.try_get("language_code")?,
        created_at: time::from_db("created_at", &created_at)?,
    })
}
