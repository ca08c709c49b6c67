//! Integration tests for the review queue
//!
//! Covers admission, the pending listing and the claim lifecycle against a
//! file-backed SQLite database.

mod helpers;

use chrono::{Duration, TimeZone, Utc};
use helpers::{record_uncertain, TestDb};
use tokio::task::JoinSet;
use uuid::Uuid;
use vqa_common::db::{QueueStatus, ValidationQueueEntry};
use vqa_common::events::QueueEvent;
use vqa_review::config::RuntimeSettings;
use vqa_review::error::QueueError;
use vqa_review::queue::{AdmissionMode, NewQueueEntry, PageCursor, PageRequest, PendingFilter};
use vqa_review::routing::ValidatorProfile;
use vqa_review::AppState;

async fn enqueue(
    state: &AppState,
    priority: u8,
    language_code: Option<&str>,
    requires_native_speaker: bool,
    now: chrono::DateTime<Utc>,
) -> ValidationQueueEntry {
    let result = record_uncertain(state, language_code).await;
    state
        .repository()
        .enqueue_at(
            NewQueueEntry {
                validation_result_id: result.id,
                priority,
                confidence_score: Some(50.0),
                language_code: language_code.map(str::to_string),
                requires_native_speaker,
            },
            now,
        )
        .await
        .unwrap()
}

fn validator(id: &str, languages: &[&str], native: &[&str]) -> ValidatorProfile {
    ValidatorProfile {
        validator_id: id.to_string(),
        languages: languages.iter().map(|s| s.to_string()).collect(),
        native_languages: native.iter().map(|s| s.to_string()).collect(),
    }
}

fn ids(entries: &[ValidationQueueEntry]) -> Vec<Uuid> {
    entries.iter().map(|e| e.id).collect()
}

// ============================================================================
// Claim exclusivity
// ============================================================================

#[tokio::test]
async fn test_concurrent_claims_have_exactly_one_winner() {
    let db = TestDb::new().await;
    let state = db.state();
    let entry = enqueue(&state, 3, Some("en-US"), false, Utc::now()).await;
    let entry_id = entry.id;

    let mut join_set = JoinSet::new();
    for i in 0..16 {
        let coordinator = state.coordinator.clone();
        join_set.spawn(async move {
            let validator_id = format!("validator-{}", i);
            let outcome = coordinator.claim(entry_id, &validator_id).await;
            (validator_id, outcome)
        });
    }

    let mut winners = Vec::new();
    let mut losers = 0;
    while let Some(joined) = join_set.join_next().await {
        let (validator_id, outcome) = joined.unwrap();
        match outcome {
            Ok(claimed) => {
                assert_eq!(claimed.claimed_by.as_deref(), Some(validator_id.as_str()));
                winners.push(validator_id);
            }
            Err(QueueError::AlreadyClaimed { .. }) => losers += 1,
            Err(other) => panic!("unexpected claim error: {:?}", other),
        }
    }

    assert_eq!(winners.len(), 1, "winners: {:?}", winners);
    assert_eq!(losers, 15);

    let stored = state.repository().get(entry.id).await.unwrap();
    assert_eq!(stored.status, QueueStatus::Claimed);
    assert_eq!(stored.claimed_by.as_deref(), Some(winners[0].as_str()));
    assert!(stored.claimed_at.is_some());
}

#[tokio::test]
async fn test_losing_claim_reports_the_owner() {
    let db = TestDb::new().await;
    let state = db.state();
    let entry = enqueue(&state, 4, Some("de-DE"), false, Utc::now()).await;

    state.coordinator.claim(entry.id, "alice").await.unwrap();

    match state.coordinator.claim(entry.id, "bob").await {
        Err(err @ QueueError::AlreadyClaimed { .. }) => {
            assert!(err.is_routine());
            if let QueueError::AlreadyClaimed { claimed_by, .. } = err {
                assert_eq!(claimed_by.as_deref(), Some("alice"));
            }
        }
        other => panic!("expected AlreadyClaimed, got {:?}", other),
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_release_requires_owner() {
    let db = TestDb::new().await;
    let state = db.state();
    let entry = enqueue(&state, 2, None, false, Utc::now()).await;

    state.coordinator.claim(entry.id, "alice").await.unwrap();

    let err = state.coordinator.release(entry.id, "bob").await.unwrap_err();
    assert!(matches!(err, QueueError::NotClaimedByCaller { ref validator_id, .. } if validator_id == "bob"));

    let released = state.coordinator.release(entry.id, "alice").await.unwrap();
    assert_eq!(released.status, QueueStatus::Pending);
    assert_eq!(released.claimed_by, None);
    assert_eq!(released.claimed_at, None);

    let reclaimed = state.coordinator.claim(entry.id, "bob").await.unwrap();
    assert_eq!(reclaimed.claimed_by.as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_completed_entries_stay_completed() {
    let db = TestDb::new().await;
    let state = db.state();
    let entry = enqueue(&state, 5, None, false, Utc::now()).await;

    state.coordinator.claim(entry.id, "alice").await.unwrap();
    let completed = state.coordinator.complete(entry.id, "alice").await.unwrap();
    assert_eq!(completed.status, QueueStatus::Completed);
    assert_eq!(completed.claimed_by.as_deref(), Some("alice"));
    assert!(completed.claimed_at.is_some());

    let claim = state.coordinator.claim(entry.id, "bob").await.unwrap_err();
    assert!(matches!(
        claim,
        QueueError::InvalidTransition { status: QueueStatus::Completed, operation: "claim", .. }
    ));
    let release = state.coordinator.release(entry.id, "alice").await.unwrap_err();
    assert!(matches!(release, QueueError::InvalidTransition { .. }));
    let again = state.coordinator.complete(entry.id, "alice").await.unwrap_err();
    assert!(matches!(again, QueueError::InvalidTransition { .. }));

    let stored = state.repository().get(entry.id).await.unwrap();
    assert_eq!(stored.status, QueueStatus::Completed);
}

#[tokio::test]
async fn test_complete_requires_claim_and_owner() {
    let db = TestDb::new().await;
    let state = db.state();
    let entry = enqueue(&state, 5, None, false, Utc::now()).await;

    let pending = state.coordinator.complete(entry.id, "alice").await.unwrap_err();
    assert!(matches!(
        pending,
        QueueError::InvalidTransition { status: QueueStatus::Pending, .. }
    ));

    state.coordinator.claim(entry.id, "alice").await.unwrap();
    let stranger = state.coordinator.complete(entry.id, "bob").await.unwrap_err();
    assert!(matches!(stranger, QueueError::NotClaimedByCaller { .. }));
}

#[tokio::test]
async fn test_mark_completed_only_from_claimed() {
    let db = TestDb::new().await;
    let state = db.state();
    let entry = enqueue(&state, 5, None, false, Utc::now()).await;

    let err = state.repository().mark_completed(entry.id).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { status: QueueStatus::Pending, .. }));

    state.coordinator.claim(entry.id, "alice").await.unwrap();
    let done = state.repository().mark_completed(entry.id).await.unwrap();
    assert_eq!(done.status, QueueStatus::Completed);
}

#[tokio::test]
async fn test_unknown_entry_is_not_found() {
    let db = TestDb::new().await;
    let state = db.state();
    let missing = Uuid::new_v4();

    assert!(matches!(state.repository().get(missing).await, Err(QueueError::NotFound(_))));
    assert!(matches!(state.coordinator.claim(missing, "alice").await, Err(QueueError::NotFound(_))));
    assert!(matches!(state.coordinator.release(missing, "alice").await, Err(QueueError::NotFound(_))));
    assert!(matches!(state.coordinator.complete(missing, "alice").await, Err(QueueError::NotFound(_))));
}

#[tokio::test]
async fn test_blank_validator_id_is_rejected() {
    let db = TestDb::new().await;
    let state = db.state();
    let entry = enqueue(&state, 5, None, false, Utc::now()).await;

    let err = state.coordinator.claim(entry.id, "   ").await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidInput(_)));
}

#[tokio::test]
async fn test_repeated_reads_are_identical() {
    let db = TestDb::new().await;
    let state = db.state();
    let entry = enqueue(&state, 5, Some("fr"), true, Utc::now()).await;

    let first = state.repository().get(entry.id).await.unwrap();
    let second = state.repository().get(entry.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, entry);
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_second_active_entry_is_rejected() {
    let db = TestDb::new().await;
    let state = db.state();
    let result = record_uncertain(&state, Some("en")).await;

    let entry = state.admission.admit(&result, false).await.unwrap().unwrap();
    assert!(state.repository().has_active_entry(result.id).await.unwrap());

    let err = state.admission.admit(&result, false).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::DuplicateAdmission { validation_result_id } if validation_result_id == result.id
    ));

    // Once the first entry is done the result may be queued again
    state.coordinator.claim(entry.id, "alice").await.unwrap();
    state.coordinator.complete(entry.id, "alice").await.unwrap();
    assert!(!state.repository().has_active_entry(result.id).await.unwrap());
    assert!(state.admission.admit(&result, false).await.unwrap().is_some());
    assert_eq!(state.repository().list_for_result(result.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_admissions_insert_once() {
    let db = TestDb::new().await;
    let state = db.state();
    let result = record_uncertain(&state, Some("en")).await;

    let mut join_set = JoinSet::new();
    for _ in 0..8 {
        let admission = state.admission.clone();
        let result = result.clone();
        join_set.spawn(async move { admission.admit(&result, false).await });
    }

    let mut admitted = 0;
    while let Some(joined) = join_set.join_next().await {
        match joined.unwrap() {
            Ok(Some(_)) => admitted += 1,
            Err(QueueError::DuplicateAdmission { .. }) => {}
            other => panic!("unexpected admission outcome: {:?}", other),
        }
    }
    assert_eq!(admitted, 1);
}

#[tokio::test]
async fn test_allow_multiple_mode_skips_active_check() {
    let db = TestDb::new().await;
    let state = db.state_with(RuntimeSettings {
        admission_mode: AdmissionMode::AllowMultiple,
        ..RuntimeSettings::default()
    });
    let result = record_uncertain(&state, None).await;

    assert!(state.admission.admit(&result, false).await.unwrap().is_some());
    assert!(state.admission.admit(&result, false).await.unwrap().is_some());
    assert_eq!(state.repository().count_by_status().await.unwrap().pending, 2);
}

#[tokio::test]
async fn test_auto_decided_results_are_not_admitted() {
    let db = TestDb::new().await;
    let state = db.state();
    let result = state
        .recorder
        .record(vqa_review::results::NewValidationResult {
            houndify_passed: Some(true),
            llm_passed: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(state.admission.admit(&result, false).await.unwrap().is_none());
    assert_eq!(state.repository().count_by_status().await.unwrap().pending, 0);
}

#[tokio::test]
async fn test_enqueue_validates_input() {
    let db = TestDb::new().await;
    let state = db.state();
    let result = record_uncertain(&state, None).await;

    let bad_priority = NewQueueEntry {
        validation_result_id: result.id,
        priority: 11,
        confidence_score: None,
        language_code: None,
        requires_native_speaker: false,
    };
    assert!(matches!(
        state.repository().enqueue(bad_priority).await,
        Err(QueueError::InvalidInput(_))
    ));

    let bad_confidence = NewQueueEntry {
        validation_result_id: result.id,
        priority: 5,
        confidence_score: Some(140.0),
        language_code: None,
        requires_native_speaker: false,
    };
    assert!(matches!(
        state.repository().enqueue(bad_confidence).await,
        Err(QueueError::InvalidInput(_))
    ));

    let orphan = NewQueueEntry {
        validation_result_id: Uuid::new_v4(),
        priority: 5,
        confidence_score: None,
        language_code: None,
        requires_native_speaker: false,
    };
    assert!(matches!(
        state.repository().enqueue(orphan).await,
        Err(QueueError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_mid_confidence_result_is_routed_normal() {
    let db = TestDb::new().await;
    let state = db.state();
    let result = record_uncertain(&state, Some("en-US")).await;

    let entry = state.admission.admit(&result, true).await.unwrap().unwrap();
    assert_eq!(entry.priority, 5);
    assert_eq!(entry.confidence_score, Some(65.5));
    assert_eq!(entry.language_code.as_deref(), Some("en-US"));
    assert!(entry.requires_native_speaker);
    assert_eq!(entry.status, QueueStatus::Pending);
}

// ============================================================================
// Pending listing
// ============================================================================

#[tokio::test]
async fn test_pending_order_is_priority_then_fifo() {
    let db = TestDb::new().await;
    let state = db.state();
    let now = Utc::now();

    // Same timestamp for all: insertion order must break ties
    let low_a = enqueue(&state, 7, None, false, now).await;
    let high = enqueue(&state, 1, None, false, now).await;
    let low_b = enqueue(&state, 7, None, false, now).await;
    let older_mid = enqueue(&state, 4, None, false, now - Duration::seconds(5)).await;
    let mid = enqueue(&state, 4, None, false, now).await;

    let page = state
        .repository()
        .list_pending(&PendingFilter::default(), &PageRequest::default())
        .await
        .unwrap();

    assert_eq!(
        ids(&page.entries),
        vec![high.id, older_mid.id, mid.id, low_a.id, low_b.id]
    );
    assert!(page.next.is_none());
}

#[tokio::test]
async fn test_pagination_is_stable_under_inserts() {
    let db = TestDb::new().await;
    let state = db.state();
    let now = Utc::now();

    let mut expected = Vec::new();
    for priority in [2, 3, 4, 5, 6] {
        expected.push(enqueue(&state, priority, None, false, now).await.id);
    }

    let filter = PendingFilter::default();
    let first = state
        .repository()
        .list_pending(&filter, &PageRequest::first(2))
        .await
        .unwrap();
    assert_eq!(ids(&first.entries), expected[..2].to_vec());
    let cursor = first.next.clone().unwrap();

    // Lands before the cursor; must not shift later pages
    enqueue(&state, 1, None, false, now).await;
    // Lands after the cursor; must show up later
    let late = enqueue(&state, 9, None, false, now).await;

    let mut seen = ids(&first.entries);
    let mut request = PageRequest {
        limit: 2,
        after: Some(cursor),
    };
    loop {
        let page = state.repository().list_pending(&filter, &request).await.unwrap();
        seen.extend(ids(&page.entries));
        match page.next {
            Some(next) => request.after = Some(next),
            None => break,
        }
    }

    let mut want = expected.clone();
    want.push(late.id);
    assert_eq!(seen, want);
}

#[tokio::test]
async fn test_cursor_with_short_timestamp_resumes_in_place() {
    let db = TestDb::new().await;
    let state = db.state();
    let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

    let first = enqueue(&state, 5, None, false, at).await;
    let second = enqueue(&state, 5, None, false, at).await;
    let third = enqueue(&state, 5, None, false, at).await;

    // Same instant, written without fractional seconds
    let cursor = PageCursor::decode(&format!("5:{}:2026-01-01T00:00:00Z", first.seq)).unwrap();
    let page = state
        .repository()
        .list_pending(
            &PendingFilter::default(),
            &PageRequest {
                limit: 10,
                after: Some(cursor),
            },
        )
        .await
        .unwrap();

    assert_eq!(ids(&page.entries), vec![second.id, third.id]);
}

#[tokio::test]
async fn test_pending_filters() {
    let db = TestDb::new().await;
    let state = db.state();
    let now = Utc::now();

    let en_native = enqueue(&state, 2, Some("en-US"), true, now).await;
    let en_plain = enqueue(&state, 6, Some("EN-us"), false, now).await;
    let de = enqueue(&state, 3, Some("de-DE"), false, now).await;
    let claimed = enqueue(&state, 1, Some("en-US"), false, now).await;
    state.coordinator.claim(claimed.id, "alice").await.unwrap();

    let repo = state.repository();
    let page = PageRequest::default();

    let english = repo
        .list_pending(
            &PendingFilter {
                language_code: Some("en-us".to_string()),
                ..Default::default()
            },
            &page,
        )
        .await
        .unwrap();
    assert_eq!(ids(&english.entries), vec![en_native.id, en_plain.id]);

    let bare = enqueue(&state, 7, Some("en"), false, now).await;
    let british = enqueue(&state, 8, Some("en_GB"), false, now).await;
    enqueue(&state, 9, Some("eng"), false, now).await;
    let any_english = repo
        .list_pending(
            &PendingFilter {
                language_code: Some("EN".to_string()),
                ..Default::default()
            },
            &page,
        )
        .await
        .unwrap();
    assert_eq!(
        ids(&any_english.entries),
        vec![en_native.id, en_plain.id, bare.id, british.id]
    );

    let native = repo
        .list_pending(
            &PendingFilter {
                requires_native_speaker: Some(true),
                ..Default::default()
            },
            &page,
        )
        .await
        .unwrap();
    assert_eq!(ids(&native.entries), vec![en_native.id]);

    let urgent = repo
        .list_pending(
            &PendingFilter {
                min_priority: Some(3),
                ..Default::default()
            },
            &page,
        )
        .await
        .unwrap();
    assert_eq!(ids(&urgent.entries), vec![en_native.id, de.id]);
}

#[tokio::test]
async fn test_count_by_status() {
    let db = TestDb::new().await;
    let state = db.state();
    let now = Utc::now();

    let a = enqueue(&state, 5, None, false, now).await;
    let b = enqueue(&state, 5, None, false, now).await;
    enqueue(&state, 5, None, false, now).await;

    state.coordinator.claim(a.id, "alice").await.unwrap();
    state.coordinator.claim(b.id, "bob").await.unwrap();
    state.coordinator.complete(b.id, "bob").await.unwrap();

    let stats = state.repository().count_by_status().await.unwrap();
    assert_eq!((stats.pending, stats.claimed, stats.completed), (1, 1, 1));
}

// ============================================================================
// claim_next
// ============================================================================

#[tokio::test]
async fn test_claim_next_respects_eligibility() {
    let db = TestDb::new().await;
    let state = db.state();
    let now = Utc::now();

    let native_fr = enqueue(&state, 1, Some("fr-FR"), true, now).await;
    let german = enqueue(&state, 2, Some("de"), false, now).await;
    let french = enqueue(&state, 3, Some("fr-CA"), false, now).await;

    // Speaks French but is not native; German is not theirs either
    let picked = state
        .coordinator
        .claim_next(&validator("carol", &["fr"], &[]), &PendingFilter::default(), 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(picked.id, french.id);
    assert_eq!(picked.claimed_by.as_deref(), Some("carol"));

    let native = state
        .coordinator
        .claim_next(&validator("dan", &[], &["fr"]), &PendingFilter::default(), 50)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(native.id, native_fr.id);

    let none = state
        .coordinator
        .claim_next(&validator("erin", &["ja"], &[]), &PendingFilter::default(), 50)
        .await
        .unwrap();
    assert!(none.is_none());

    let still_pending = state.repository().get(german.id).await.unwrap();
    assert_eq!(still_pending.status, QueueStatus::Pending);
}

#[tokio::test]
async fn test_concurrent_claim_next_never_shares_entries() {
    let db = TestDb::new().await;
    let state = db.state();
    let now = Utc::now();
    for _ in 0..4 {
        enqueue(&state, 5, None, false, now).await;
    }

    let mut join_set = JoinSet::new();
    for i in 0..6 {
        let coordinator = state.coordinator.clone();
        join_set.spawn(async move {
            coordinator
                .claim_next(
                    &validator(&format!("v-{}", i), &[], &[]),
                    &PendingFilter::default(),
                    50,
                )
                .await
        });
    }

    let mut claimed = Vec::new();
    let mut empty = 0;
    while let Some(joined) = join_set.join_next().await {
        match joined.unwrap().unwrap() {
            Some(entry) => claimed.push(entry.id),
            None => empty += 1,
        }
    }

    claimed.sort();
    claimed.dedup();
    assert_eq!(claimed.len(), 4);
    assert_eq!(empty, 2);
}

// ============================================================================
// Events and cascade
// ============================================================================

#[tokio::test]
async fn test_transitions_publish_events() {
    let db = TestDb::new().await;
    let state = db.state();
    let mut rx = state.events.subscribe();

    let result = record_uncertain(&state, Some("en")).await;
    let entry = state.admission.admit(&result, false).await.unwrap().unwrap();
    state.coordinator.claim(entry.id, "alice").await.unwrap();
    state.coordinator.release(entry.id, "alice").await.unwrap();
    state.coordinator.claim(entry.id, "bob").await.unwrap();
    state.coordinator.complete(entry.id, "bob").await.unwrap();

    let mut types = Vec::new();
    while let Ok(event) = rx.try_recv() {
        types.push(event.event_type());
        if let QueueEvent::EntryCompleted { entry_id, validator_id, .. } = &event {
            assert_eq!(*entry_id, entry.id);
            assert_eq!(validator_id, "bob");
        }
    }
    assert_eq!(
        types,
        vec![
            "ResultRecorded",
            "EntryEnqueued",
            "EntryClaimed",
            "EntryReleased",
            "EntryClaimed",
            "EntryCompleted"
        ]
    );
}

#[tokio::test]
async fn test_record_and_admit_writes_both_rows() {
    let db = TestDb::new().await;
    let state = db.state();
    let mut rx = state.events.subscribe();

    let (result, entry) = state
        .admission
        .record_and_admit(
            &state.recorder,
            helpers::disagreeing_result(Some("pt-BR"), Some(0.655)),
            true,
        )
        .await
        .unwrap();
    let entry = entry.unwrap();

    assert_eq!(entry.validation_result_id, result.id);
    assert_eq!(entry.priority, 5);
    assert_eq!(entry.confidence_score, Some(65.5));
    assert!(entry.requires_native_speaker);
    let stored = state.recorder.get(result.id).await.unwrap();
    assert_eq!(stored.review_status, result.review_status);
    assert_eq!(stored.language_code.as_deref(), Some("pt-BR"));
    assert_eq!(state.repository().list_for_result(result.id).await.unwrap().len(), 1);

    let mut types = Vec::new();
    while let Ok(event) = rx.try_recv() {
        types.push(event.event_type());
    }
    assert_eq!(types, vec!["ResultRecorded", "EntryEnqueued"]);
}

#[tokio::test]
async fn test_record_and_admit_skips_queue_for_auto_decided() {
    let db = TestDb::new().await;
    let state = db.state();

    let (result, entry) = state
        .admission
        .record_and_admit(
            &state.recorder,
            vqa_review::results::NewValidationResult {
                houndify_passed: Some(false),
                llm_passed: Some(false),
                ..Default::default()
            },
            false,
        )
        .await
        .unwrap();

    assert!(entry.is_none());
    assert!(state.repository().list_for_result(result.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lost_claim_publishes_nothing() {
    let db = TestDb::new().await;
    let state = db.state();
    let entry = enqueue(&state, 5, None, false, Utc::now()).await;
    state.coordinator.claim(entry.id, "alice").await.unwrap();

    let mut rx = state.events.subscribe();
    let _ = state.coordinator.claim(entry.id, "bob").await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_deleting_result_removes_its_entries() {
    let db = TestDb::new().await;
    let state = db.state();
    let entry = enqueue(&state, 5, None, false, Utc::now()).await;

    sqlx::query("DELETE FROM validation_results WHERE id = ?")
        .bind(entry.validation_result_id.to_string())
        .execute(&db.pool)
        .await
        .unwrap();

    assert!(matches!(state.repository().get(entry.id).await, Err(QueueError::NotFound(_))));
}
