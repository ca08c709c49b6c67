//! Queue entry persistence
//!
//! Every write is a single conditional statement whose WHERE clause carries
//! the precondition. Callers learn whether the precondition held from the
//! affected row count, never from an earlier read.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;
use vqa_common::db::{retry_on_lock, QueueStatus, ValidationQueueEntry};
use vqa_common::time;

use super::{stamp, AdmissionMode, NewQueueEntry, Page, PageCursor, PageRequest, PendingFilter, QueueStats};
use crate::error::{QueueError, QueueResult};
use crate::routing::{MAX_PRIORITY, MIN_PRIORITY};

const ENTRY_COLUMNS: &str = "seq, id, validation_result_id, priority, confidence_score, \
     language_code, requires_native_speaker, claimed_by, claimed_at, status, created_at, updated_at";

/// Typed access to the `validation_queue` table
#[derive(Clone)]
pub struct QueueRepository {
    db: SqlitePool,
    admission_mode: AdmissionMode,
    max_lock_wait_ms: u64,
}

impl QueueRepository {
    /// Create a repository over an initialized pool
    pub fn new(db: SqlitePool, admission_mode: AdmissionMode, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            admission_mode,
            max_lock_wait_ms,
        }
    }

    pub fn admission_mode(&self) -> AdmissionMode {
        self.admission_mode
    }

    /// Admit a result to the queue in `pending` state
    pub async fn enqueue(&self, new: NewQueueEntry) -> QueueResult<ValidationQueueEntry> {
        self.enqueue_at(new, time::now()).await
    }

    /// [`enqueue`](Self::enqueue) with an explicit creation time
    ///
    /// In `SingleActive` mode the existence check and the insert are the same
    /// statement, so two concurrent admissions for one result cannot both
    /// succeed.
    pub async fn enqueue_at(
        &self,
        new: NewQueueEntry,
        now: DateTime<Utc>,
    ) -> QueueResult<ValidationQueueEntry> {
        validate_new_entry(&new)?;

        let id = Uuid::new_v4();
        let created_at = stamp(&now);

        let inserted = retry_on_lock("enqueue", self.max_lock_wait_ms, || async {
            self.insert_pending(&self.db, id, &new, &created_at).await
        })
        .await?;

        if inserted == 0 {
            if !self.result_exists(new.validation_result_id).await? {
                return Err(QueueError::NotFound(format!(
                    "validation result {}",
                    new.validation_result_id
                )));
            }
            return Err(QueueError::DuplicateAdmission {
                validation_result_id: new.validation_result_id,
            });
        }

        info!(
            entry_id = %id,
            validation_result_id = %new.validation_result_id,
            priority = new.priority,
            language_code = new.language_code.as_deref().unwrap_or("-"),
            requires_native_speaker = new.requires_native_speaker,
            "Enqueued validation entry"
        );

        self.get(id).await
    }

    /// Whether a pending or claimed entry exists for a result
    pub async fn has_active_entry(&self, validation_result_id: Uuid) -> QueueResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM validation_queue
                WHERE validation_result_id = ?
                  AND status IN ('pending', 'claimed')
            )
            "#,
        )
        .bind(validation_result_id.to_string())
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }

    /// The conditional admission insert, on any executor
    ///
    /// Returns the affected row count: 0 when the result is missing or, in
    /// `SingleActive` mode, already has an active entry. Runs inside the
    /// caller's transaction when handed one.
    pub(crate) async fn insert_pending<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        new: &NewQueueEntry,
        created_at: &str,
    ) -> QueueResult<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = match self.admission_mode {
            AdmissionMode::SingleActive => {
                r#"
                INSERT INTO validation_queue (
                    id, validation_result_id, priority, confidence_score,
                    language_code, requires_native_speaker, status, created_at, updated_at
                )
                SELECT ?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7
                WHERE EXISTS (SELECT 1 FROM validation_results WHERE id = ?2)
                  AND NOT EXISTS (
                      SELECT 1 FROM validation_queue
                      WHERE validation_result_id = ?2
                        AND status IN ('pending', 'claimed')
                  )
                "#
            }
            AdmissionMode::AllowMultiple => {
                r#"
                INSERT INTO validation_queue (
                    id, validation_result_id, priority, confidence_score,
                    language_code, requires_native_speaker, status, created_at, updated_at
                )
                SELECT ?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7
                WHERE EXISTS (SELECT 1 FROM validation_results WHERE id = ?2)
                "#
            }
        };

        let result = sqlx::query(sql)
            .bind(id.to_string())
            .bind(new.validation_result_id.to_string())
            .bind(new.priority as i64)
            .bind(new.confidence_score)
            .bind(&new.language_code)
            .bind(new.requires_native_speaker)
            .bind(created_at)
            .execute(executor)
            .await?;

        Ok(result.rows_affected())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub(crate) fn max_lock_wait_ms(&self) -> u64 {
        self.max_lock_wait_ms
    }

    /// Pending entries, most urgent first, FIFO within a priority
    pub async fn list_pending(
        &self,
        filter: &PendingFilter,
        page: &PageRequest,
    ) -> QueueResult<Page> {
        let limit = page.effective_limit();

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM validation_queue WHERE status = 'pending'",
            ENTRY_COLUMNS
        ));

        if let Some(language) = &filter.language_code {
            // `en` matches `en`, `en-US` and `en_GB`; `en-US` matches `en-US` and its subtags
            let language = language.trim().to_lowercase();
            qb.push(" AND (lower(language_code) = ")
                .push_bind(language.clone())
                .push(" OR lower(substr(language_code, 1, ")
                .push_bind(language.len() as i64 + 1)
                .push(")) IN (")
                .push_bind(format!("{}-", language))
                .push(", ")
                .push_bind(format!("{}_", language))
                .push("))");
        }
        if let Some(native) = filter.requires_native_speaker {
            qb.push(" AND requires_native_speaker = ").push_bind(native);
        }
        if let Some(min_priority) = filter.min_priority {
            qb.push(" AND priority <= ").push_bind(min_priority as i64);
        }
        if let Some(cursor) = &page.after {
            let priority = cursor.priority as i64;
            qb.push(" AND (priority > ")
                .push_bind(priority)
                .push(" OR (priority = ")
                .push_bind(priority)
                .push(" AND (created_at > ")
                .push_bind(cursor.created_at.clone())
                .push(" OR (created_at = ")
                .push_bind(cursor.created_at.clone())
                .push(" AND seq > ")
                .push_bind(cursor.seq)
                .push("))))");
        }

        // One extra row tells us whether another page follows
        qb.push(" ORDER BY priority ASC, created_at ASC, seq ASC LIMIT ")
            .push_bind(limit as i64 + 1);

        let rows = qb.build().fetch_all(&self.db).await?;

        let mut entries = rows
            .iter()
            .map(entry_from_row)
            .collect::<QueueResult<Vec<_>>>()?;

        let next = if entries.len() > limit as usize {
            entries.truncate(limit as usize);
            entries.last().map(PageCursor::after)
        } else {
            None
        };

        debug!(
            returned = entries.len(),
            has_more = next.is_some(),
            "Listed pending validation entries"
        );

        Ok(Page { entries, next })
    }

    /// Fetch one entry
    pub async fn get(&self, entry_id: Uuid) -> QueueResult<ValidationQueueEntry> {
        self.find(entry_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("queue entry {}", entry_id)))
    }

    pub(crate) async fn find(&self, entry_id: Uuid) -> QueueResult<Option<ValidationQueueEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM validation_queue WHERE id = ?",
            ENTRY_COLUMNS
        ))
        .bind(entry_id.to_string())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    /// All entries ever created for a result, oldest first
    pub async fn list_for_result(
        &self,
        validation_result_id: Uuid,
    ) -> QueueResult<Vec<ValidationQueueEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM validation_queue WHERE validation_result_id = ? ORDER BY seq ASC",
            ENTRY_COLUMNS
        ))
        .bind(validation_result_id.to_string())
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Move a claimed entry to `completed`
    ///
    /// Fails with `InvalidTransition` unless the entry is currently claimed.
    /// Ownership is not checked here; validators go through
    /// `ClaimCoordinator::complete`.
    pub async fn mark_completed(&self, entry_id: Uuid) -> QueueResult<ValidationQueueEntry> {
        if self.complete_if_claimed(entry_id, None, time::now()).await? {
            info!(entry_id = %entry_id, "Validation entry completed");
            return self.get(entry_id).await;
        }

        let entry = self.get(entry_id).await?;
        Err(QueueError::InvalidTransition {
            entry_id,
            status: entry.status,
            operation: "complete",
        })
    }

    /// Entry counts per status
    pub async fn count_by_status(&self) -> QueueResult<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM validation_queue GROUP BY status")
                .fetch_all(&self.db)
                .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match QueueStatus::parse(&status)? {
                QueueStatus::Pending => stats.pending = count,
                QueueStatus::Claimed => stats.claimed = count,
                QueueStatus::Completed => stats.completed = count,
            }
        }
        Ok(stats)
    }

    /// `pending → claimed` compare-and-swap; true when this call won
    pub(crate) async fn claim_if_pending(
        &self,
        entry_id: Uuid,
        validator_id: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let id = entry_id.to_string();
        let at = stamp(&now);

        let affected = retry_on_lock("claim", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE validation_queue
                SET status = 'claimed',
                    claimed_by = ?2,
                    claimed_at = ?3,
                    updated_at = ?3
                WHERE id = ?1
                  AND status = 'pending'
                "#,
            )
            .bind(&id)
            .bind(validator_id)
            .bind(&at)
            .execute(&self.db)
            .await
            .map_err(QueueError::from)?;
            Ok::<_, QueueError>(result.rows_affected())
        })
        .await?;

        Ok(affected == 1)
    }

    /// `claimed → pending` for the owning validator; true when applied
    pub(crate) async fn release_if_owner(
        &self,
        entry_id: Uuid,
        validator_id: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let id = entry_id.to_string();
        let at = stamp(&now);

        let affected = retry_on_lock("release", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE validation_queue
                SET status = 'pending',
                    claimed_by = NULL,
                    claimed_at = NULL,
                    updated_at = ?3
                WHERE id = ?1
                  AND status = 'claimed'
                  AND claimed_by = ?2
                "#,
            )
            .bind(&id)
            .bind(validator_id)
            .bind(&at)
            .execute(&self.db)
            .await
            .map_err(QueueError::from)?;
            Ok::<_, QueueError>(result.rows_affected())
        })
        .await?;

        Ok(affected == 1)
    }

    /// `claimed → completed`, optionally only for a given owner; true when applied
    ///
    /// Claim fields are kept on completed entries for audit.
    pub(crate) async fn complete_if_claimed(
        &self,
        entry_id: Uuid,
        owner: Option<&str>,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let id = entry_id.to_string();
        let at = stamp(&now);

        let affected = retry_on_lock("complete", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE validation_queue
                SET status = 'completed',
                    updated_at = ?3
                WHERE id = ?1
                  AND status = 'claimed'
                  AND (?2 IS NULL OR claimed_by = ?2)
                "#,
            )
            .bind(&id)
            .bind(owner)
            .bind(&at)
            .execute(&self.db)
            .await
            .map_err(QueueError::from)?;
            Ok::<_, QueueError>(result.rows_affected())
        })
        .await?;

        Ok(affected == 1)
    }

    async fn result_exists(&self, validation_result_id: Uuid) -> QueueResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM validation_results WHERE id = ?)")
                .bind(validation_result_id.to_string())
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }
}

pub(crate) fn validate_new_entry(new: &NewQueueEntry) -> QueueResult<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&new.priority) {
        return Err(QueueError::InvalidInput(format!(
            "priority {} outside {}..={}",
            new.priority, MIN_PRIORITY, MAX_PRIORITY
        )));
    }
    if let Some(score) = new.confidence_score {
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            return Err(QueueError::InvalidInput(format!(
                "confidence_score {} outside 0..=100",
                score
            )));
        }
    }
    Ok(())
}

fn parse_uuid(column: &str, value: &str) -> QueueResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        QueueError::Common(vqa_common::Error::Internal(format!(
            "Failed to parse {} '{}': {}",
            column, value, e
        )))
    })
}

fn entry_from_row(row: &SqliteRow) -> QueueResult<ValidationQueueEntry> {
    let id: String = row.try_get("id")?;
    let validation_result_id: String = row.try_get("validation_result_id")?;
    let priority: i64 = row.try_get("priority")?;
    let status: String = row.try_get("status")?;
    let claimed_at: Option<String> = row.try_get("claimed_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let priority = u8::try_from(priority).map_err(|_| {
        QueueError::Common(vqa_common::Error::Internal(format!(
            "Stored priority {} out of range",
            priority
        )))
    })?;

    Ok(ValidationQueueEntry {
        id: parse_uuid("id", &id)?,
        validation_result_id: parse_uuid("validation_result_id", &validation_result_id)?,
        priority,
        confidence_score: row.try_get("confidence_score")?,
        language_code: row.try_get("language_code")?,
        requires_native_speaker: row.try_get("requires_native_speaker")?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: claimed_at
            .map(|s| time::from_db("claimed_at", &s))
            .transpose()?,
        status: QueueStatus::parse(&status)?,
        created_at: time::from_db("created_at", &created_at)?,
        updated_at: time::from_db("updated_at", &updated_at)?,
        seq: row.try_get("seq")?,
    })
}
