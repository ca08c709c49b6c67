//! Claim lifecycle for queue entries
//!
//! `pending → claimed → completed`, with `claimed → pending` on release.
//! Each transition is one compare-and-swap in the repository; when it does
//! not apply, the entry is re-read only to explain why.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;
use vqa_common::db::{QueueStatus, ValidationQueueEntry};
use vqa_common::events::{EventBus, QueueEvent};
use vqa_common::time;

use super::{PageRequest, PendingFilter, QueueRepository};
use crate::error::{QueueError, QueueResult};
use crate::routing::{ValidatorEligibility, ValidatorProfile};

/// Serializes competing validators through the storage layer
#[derive(Clone)]
pub struct ClaimCoordinator {
    repo: QueueRepository,
    events: EventBus,
}

impl ClaimCoordinator {
    pub fn new(repo: QueueRepository, events: EventBus) -> Self {
        Self { repo, events }
    }

    pub fn repository(&self) -> &QueueRepository {
        &self.repo
    }

    /// Claim a pending entry
    ///
    /// Exactly one of any number of concurrent callers succeeds; the rest get
    /// `AlreadyClaimed`.
    pub async fn claim(
        &self,
        entry_id: Uuid,
        validator_id: &str,
    ) -> QueueResult<ValidationQueueEntry> {
        self.claim_at(entry_id, validator_id, time::now()).await
    }

    /// [`claim`](Self::claim) with an explicit claim time
    pub async fn claim_at(
        &self,
        entry_id: Uuid,
        validator_id: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<ValidationQueueEntry> {
        let validator_id = validate_validator_id(validator_id)?;

        if !self.repo.claim_if_pending(entry_id, validator_id, now).await? {
            let entry = self.current(entry_id).await?;
            debug!(
                entry_id = %entry_id,
                validator_id,
                status = %entry.status,
                claimed_by = entry.claimed_by.as_deref().unwrap_or("-"),
                "Claim lost"
            );
            return Err(lost_claim_error(entry));
        }

        info!(entry_id = %entry_id, validator_id, "Validation entry claimed");
        self.events.emit_lossy(QueueEvent::EntryClaimed {
            entry_id,
            validator_id: validator_id.to_string(),
            timestamp: now,
        });

        self.repo.get(entry_id).await
    }

    /// Hand a claimed entry back to the pool
    pub async fn release(
        &self,
        entry_id: Uuid,
        validator_id: &str,
    ) -> QueueResult<ValidationQueueEntry> {
        let validator_id = validate_validator_id(validator_id)?;
        let now = time::now();

        if !self.repo.release_if_owner(entry_id, validator_id, now).await? {
            return Err(self.explain_owner_failure(entry_id, validator_id, "release").await);
        }

        info!(entry_id = %entry_id, validator_id, "Validation entry released");
        self.events.emit_lossy(QueueEvent::EntryReleased {
            entry_id,
            validator_id: validator_id.to_string(),
            timestamp: now,
        });

        self.repo.get(entry_id).await
    }

    /// Finish review of a claimed entry
    ///
    /// Completion is terminal.
    pub async fn complete(
        &self,
        entry_id: Uuid,
        validator_id: &str,
    ) -> QueueResult<ValidationQueueEntry> {
        let validator_id = validate_validator_id(validator_id)?;
        let now = time::now();

        if !self
            .repo
            .complete_if_claimed(entry_id, Some(validator_id), now)
            .await?
        {
            return Err(self.explain_owner_failure(entry_id, validator_id, "complete").await);
        }

        info!(entry_id = %entry_id, validator_id, "Validation entry completed");
        self.events.emit_lossy(QueueEvent::EntryCompleted {
            entry_id,
            validator_id: validator_id.to_string(),
            timestamp: now,
        });

        self.repo.get(entry_id).await
    }

    /// Claim the most urgent pending entry this validator is eligible for
    ///
    /// Walks pending entries in queue order and attempts a claim on each
    /// eligible one. Losing a race just moves on to the next entry. Returns
    /// `None` when nothing eligible is left.
    pub async fn claim_next(
        &self,
        validator: &ValidatorProfile,
        filter: &PendingFilter,
        page_size: u32,
    ) -> QueueResult<Option<ValidationQueueEntry>> {
        validate_validator_id(&validator.validator_id)?;

        let mut request = PageRequest::first(page_size);
        loop {
            let page = self.repo.list_pending(filter, &request).await?;

            for entry in &page.entries {
                let eligibility = ValidatorEligibility {
                    language_code: entry.language_code.clone(),
                    requires_native_speaker: entry.requires_native_speaker,
                };
                if !eligibility.accepts(validator) {
                    continue;
                }

                match self.claim(entry.id, &validator.validator_id).await {
                    Ok(claimed) => return Ok(Some(claimed)),
                    Err(err) if err.is_routine() => continue,
                    // Completed or deleted between listing and claiming
                    Err(QueueError::InvalidTransition { .. } | QueueError::NotFound(_)) => continue,
                    Err(err) => return Err(err),
                }
            }

            match page.next {
                Some(cursor) => request.after = Some(cursor),
                None => break,
            }
        }

        debug!(
            validator_id = %validator.validator_id,
            "No eligible pending entry for validator"
        );
        Ok(None)
    }

    async fn current(&self, entry_id: Uuid) -> QueueResult<ValidationQueueEntry> {
        self.repo.get(entry_id).await
    }

    async fn explain_owner_failure(
        &self,
        entry_id: Uuid,
        validator_id: &str,
        operation: &'static str,
    ) -> QueueError {
        let entry = match self.current(entry_id).await {
            Ok(entry) => entry,
            Err(err) => return err,
        };

        if entry.status != QueueStatus::Claimed {
            return QueueError::InvalidTransition {
                entry_id,
                status: entry.status,
                operation,
            };
        }

        QueueError::NotClaimedByCaller {
            entry_id,
            validator_id: validator_id.to_string(),
        }
    }
}

/// Classify a failed `pending → claimed` swap from a re-read of the entry
///
/// A `pending` re-read means another validator claimed and released it in
/// between; the caller still lost to a claim.
fn lost_claim_error(entry: ValidationQueueEntry) -> QueueError {
    match entry.status {
        QueueStatus::Claimed | QueueStatus::Pending => QueueError::AlreadyClaimed {
            entry_id: entry.id,
            claimed_by: entry.claimed_by,
        },
        status => QueueError::InvalidTransition {
            entry_id: entry.id,
            status,
            operation: "claim",
        },
    }
}

fn validate_validator_id(validator_id: &str) -> QueueResult<&str> {
    let trimmed = validator_id.trim();
    if trimmed.is_empty() {
        return Err(QueueError::InvalidInput(
            "validator_id must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}
