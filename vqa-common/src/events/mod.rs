//! Event types for the validation queue
//!
//! Provides queue lifecycle events and the EventBus that carries them to
//! notification, metrics and SSE consumers. Consumers only read; nothing
//! subscribed to the bus may mutate queue state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::{FinalDecision, ReviewStatus};

/// Queue and result lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueEvent {
    /// A validation result was recorded and its decision computed
    ResultRecorded {
        validation_result_id: Uuid,
        final_decision: FinalDecision,
        review_status: ReviewStatus,
        timestamp: DateTime<Utc>,
    },

    /// A result was admitted to the human review queue
    ///
    /// Carries the routing fields assignment notifications filter on.
    EntryEnqueued {
        entry_id: Uuid,
        validation_result_id: Uuid,
        priority: u8,
        language_code: Option<String>,
        requires_native_speaker: bool,
        timestamp: DateTime<Utc>,
    },

    /// A validator won the claim on an entry
    EntryClaimed {
        entry_id: Uuid,
        validator_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The owning validator handed the entry back
    EntryReleased {
        entry_id: Uuid,
        validator_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Human review finished
    EntryCompleted {
        entry_id: Uuid,
        validator_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::ResultRecorded { .. } => "ResultRecorded",
            QueueEvent::EntryEnqueued { .. } => "EntryEnqueued",
            QueueEvent::EntryClaimed { .. } => "EntryClaimed",
            QueueEvent::EntryReleased { .. } => "EntryReleased",
            QueueEvent::EntryCompleted { .. } => "EntryCompleted",
        }
    }
}

/// Broadcast bus for queue events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers that fall more than `capacity` events behind lose the
    /// oldest events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: QueueEvent,
    ) -> Result<usize, broadcast::error::SendError<QueueEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: QueueEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
