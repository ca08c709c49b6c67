//! Human validation queue
//!
//! `QueueRepository` is the typed persistence surface; `ClaimCoordinator`
//! owns every state transition after an entry is created.

mod coordinator;
mod repository;

pub use coordinator::ClaimCoordinator;
pub use repository::QueueRepository;
pub(crate) use repository::validate_new_entry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vqa_common::db::ValidationQueueEntry;

use crate::error::{QueueError, QueueResult};

/// Default number of entries per `list_pending` page
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Upper bound on a requested page size
pub const MAX_PAGE_SIZE: u32 = 500;

/// Whether a result may have more than one active (pending/claimed) entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Reject a second active entry with `DuplicateAdmission`
    SingleActive,
    /// No check; re-review admissions are allowed
    AllowMultiple,
}

impl AdmissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionMode::SingleActive => "single_active",
            AdmissionMode::AllowMultiple => "allow_multiple",
        }
    }
}

impl std::str::FromStr for AdmissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "single_active" => Ok(AdmissionMode::SingleActive),
            "allow_multiple" => Ok(AdmissionMode::AllowMultiple),
            other => Err(format!("unknown admission mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for AdmissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields supplied when admitting a result to the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQueueEntry {
    pub validation_result_id: Uuid,
    pub priority: u8,
    pub confidence_score: Option<f64>,
    pub language_code: Option<String>,
    pub requires_native_speaker: bool,
}

/// Filter for `list_pending`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFilter {
    /// Case-insensitive; matches the tag itself and any more specific tag
    /// (`en` selects `en-US`)
    pub language_code: Option<String>,
    pub requires_native_speaker: Option<bool>,
    /// Keep entries at least this urgent (numeric `priority <= min_priority`)
    pub min_priority: Option<u8>,
}

/// Position after the last entry of a page
///
/// Keyset pagination over `(priority, created_at, seq)`: entries inserted
/// between page fetches land in their sorted place without shifting entries
/// already returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub priority: u8,
    pub created_at: String,
    pub seq: i64,
}

impl PageCursor {
    pub(crate) fn after(entry: &ValidationQueueEntry) -> Self {
        Self {
            priority: entry.priority,
            created_at: vqa_common::time::to_db(&entry.created_at),
            seq: entry.seq,
        }
    }

    /// Opaque text form handed to API clients
    pub fn encode(&self) -> String {
        format!("{}:{}:{}", self.priority, self.seq, self.created_at)
    }

    pub fn decode(s: &str) -> QueueResult<Self> {
        let invalid = || QueueError::InvalidInput(format!("invalid page cursor '{}'", s));

        let mut parts = s.splitn(3, ':');
        let priority = parts.next().and_then(|p| p.parse::<u8>().ok()).ok_or_else(invalid)?;
        let seq = parts.next().and_then(|p| p.parse::<i64>().ok()).ok_or_else(invalid)?;
        let created_at = parts.next().ok_or_else(invalid)?;
        let created_at = vqa_common::time::from_db("cursor", created_at).map_err(|_| invalid())?;

        // Compared as text against the stored column, so it must be in the stored form
        Ok(Self {
            priority,
            created_at: vqa_common::time::to_db(&created_at),
            seq,
        })
    }
}

/// Page selection for `list_pending`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub after: Option<PageCursor>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            after: None,
        }
    }
}

impl PageRequest {
    pub fn first(limit: u32) -> Self {
        Self { limit, after: None }
    }

    pub(crate) fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }
}

/// One page of pending entries
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub entries: Vec<ValidationQueueEntry>,
    /// Present when more entries follow
    pub next: Option<PageCursor>,
}

/// Entry counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub claimed: i64,
    pub completed: i64,
}

/// Timestamp helper so transitions stamp `updated_at` consistently
pub(crate) fn stamp(now: &DateTime<Utc>) -> String {
    vqa_common::time::to_db(now)
}
