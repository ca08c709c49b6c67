//! Admission of uncertain results into the human review queue

use tracing::{debug, info};
use uuid::Uuid;
use vqa_common::db::{retry_on_lock, ReviewStatus, ValidationQueueEntry, ValidationResult};
use vqa_common::events::{EventBus, QueueEvent};
use vqa_common::time;

use crate::error::{QueueError, QueueResult};
use crate::queue::{validate_new_entry, NewQueueEntry, QueueRepository};
use crate::results::{insert_result, NewValidationResult, ResultRecorder};
use crate::routing::{route, PriorityPolicy};

/// AI-uncertainty score in percent for a result
///
/// ASR confidence when the Houndify stage reported one, else the mean judge
/// confidence of the ensemble.
pub fn confidence_score(result: &ValidationResult) -> Option<f64> {
    let fraction = result
        .asr_confidence_score
        .filter(|s| s.is_finite())
        .or_else(|| {
            result
                .ensemble_result
                .as_ref()
                .and_then(|e| e.mean_confidence())
        })?;

    Some((fraction.clamp(0.0, 1.0) * 100.0 * 100.0).round() / 100.0)
}

/// Routes `needs_review` results into the queue
#[derive(Clone)]
pub struct Admission {
    repo: QueueRepository,
    policy: PriorityPolicy,
    events: EventBus,
}

impl Admission {
    pub fn new(repo: QueueRepository, policy: PriorityPolicy, events: EventBus) -> Self {
        Self {
            repo,
            policy,
            events,
        }
    }

    pub fn policy(&self) -> &PriorityPolicy {
        &self.policy
    }

    /// Enqueue a result that needs human review
    ///
    /// Auto-decided results are not admitted and yield `None`.
    pub async fn admit(
        &self,
        result: &ValidationResult,
        requires_native_speaker: bool,
    ) -> QueueResult<Option<ValidationQueueEntry>> {
        let Some(new) = self.plan(result, requires_native_speaker) else {
            return Ok(None);
        };

        let entry = self.repo.enqueue(new).await?;
        self.announce(&entry);
        Ok(Some(entry))
    }

    /// Store a new result and, when it needs review, its queue entry
    ///
    /// Both rows are written in one transaction: a failed admission leaves
    /// no result behind, so every stored `needs_review` result has an entry.
    /// Events go out only after the commit.
    pub async fn record_and_admit(
        &self,
        recorder: &ResultRecorder,
        new: NewValidationResult,
        requires_native_speaker: bool,
    ) -> QueueResult<(ValidationResult, Option<ValidationQueueEntry>)> {
        let result = recorder.prepare(new)?;
        let pending = self.plan(&result, requires_native_speaker);
        if let Some(entry) = &pending {
            validate_new_entry(entry)?;
        }
        let entry_id = Uuid::new_v4();
        let created_at = time::to_db(&result.created_at);

        retry_on_lock("record_and_admit", self.repo.max_lock_wait_ms(), || async {
            let mut tx = self.repo.pool().begin().await?;

            insert_result(&mut *tx, &result).await?;
            if let Some(entry) = &pending {
                let inserted = self
                    .repo
                    .insert_pending(&mut *tx, entry_id, entry, &created_at)
                    .await?;
                if inserted == 0 {
                    // Dropping the transaction rolls the result back too
                    return Err(QueueError::DuplicateAdmission {
                        validation_result_id: result.id,
                    });
                }
            }

            tx.commit().await?;
            Ok::<_, QueueError>(())
        })
        .await?;

        recorder.announce(&result);
        let entry = match pending {
            Some(_) => {
                let entry = self.repo.get(entry_id).await?;
                info!(
                    entry_id = %entry.id,
                    validation_result_id = %result.id,
                    priority = entry.priority,
                    "Admitted result for human review"
                );
                self.announce(&entry);
                Some(entry)
            }
            None => None,
        };

        Ok((result, entry))
    }

    /// Queue entry for a result, or `None` when it was auto-decided
    fn plan(
        &self,
        result: &ValidationResult,
        requires_native_speaker: bool,
    ) -> Option<NewQueueEntry> {
        if result.review_status != ReviewStatus::NeedsReview {
            debug!(
                validation_result_id = %result.id,
                review_status = %result.review_status,
                "Result auto-decided, not admitted"
            );
            return None;
        }

        let confidence = confidence_score(result);
        let routing = route(
            &self.policy,
            confidence,
            result.language_code.as_deref(),
            requires_native_speaker,
        );

        Some(NewQueueEntry {
            validation_result_id: result.id,
            priority: routing.priority,
            confidence_score: confidence,
            language_code: routing.eligibility.language_code,
            requires_native_speaker: routing.eligibility.requires_native_speaker,
        })
    }

    fn announce(&self, entry: &ValidationQueueEntry) {
        self.events.emit_lossy(QueueEvent::EntryEnqueued {
            entry_id: entry.id,
            validation_result_id: entry.validation_result_id,
            priority: entry.priority,
            language_code: entry.language_code.clone(),
            requires_native_speaker: entry.requires_native_speaker,
            timestamp: entry.created_at,
        });
    }
}
