//! End-to-end flows through `ProgressService`: session planning, quiz
//! completion, sign-in and account removal.

mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Duration, Utc};

use common::{
    at, profile, question, quiz, sqlite_stores, Failure, MemoryRemoteStore, StaticQuestionPool,
};
use progress_sync::progress::{Difficulty, ExamSummary, MasteryLevel};
use progress_sync::questions::{QuestionPoolProvider, UsedQuestionTracker};
use progress_sync::storage::{LocalStore, SqliteUsedQuestionTracker};
use progress_sync::sync::{SyncOrchestrator, SyncState};
use progress_sync::{Identity, ProgressService, SessionError, SessionPlan, SessionSettings};

const VERSION: i64 = 1;

fn settings(count: usize) -> SessionSettings {
    SessionSettings {
        language: "en".to_string(),
        bank_version: VERSION,
        session_question_count: count,
        device_id: "device-a".to_string(),
    }
}

struct Harness {
    service: ProgressService,
    tracker: SqliteUsedQuestionTracker,
    remote: Option<Arc<MemoryRemoteStore>>,
}

fn harness(pool: Arc<dyn QuestionPoolProvider>, count: usize, with_remote: bool) -> Harness {
    let (store, tracker) = sqlite_stores();
    let remote = with_remote.then(MemoryRemoteStore::new);
    let sync = remote
        .as_ref()
        .map(|remote| SyncOrchestrator::new(Arc::new(store.clone()), remote.clone()));
    let service = ProgressService::new(
        store,
        Arc::new(tracker.clone()),
        pool,
        sync,
        settings(count),
    );
    Harness {
        service,
        tracker,
        remote,
    }
}

fn bank(size: usize) -> Arc<StaticQuestionPool> {
    StaticQuestionPool::new(
        (0..size)
            .map(|i| question(&format!("q{i}"), "fiqh", Difficulty::Easy))
            .collect(),
    )
}

#[test]
fn test_session_draws_unused_questions_until_bank_completed() {
    let h = harness(bank(4), 3, false);
    let learner = h.service.resume().unwrap();

    let SessionPlan::Ready(batch) = h.service.start_session(&learner).unwrap() else {
        panic!("expected a batch");
    };
    assert_eq!(batch.len(), 3);

    // selecting does not commit anything
    assert!(h.tracker.get_used_ids(VERSION).unwrap().is_empty());

    let ids: Vec<String> = (0..4).map(|i| format!("q{i}")).collect();
    let answers: Vec<(&str, &str, bool)> = ids.iter().map(|id| (id.as_str(), "fiqh", true)).collect();
    let (learner, _) = h
        .service
        .complete_quiz(&learner, &quiz(&answers, Utc::now()))
        .unwrap();

    assert_eq!(h.tracker.get_used_ids(VERSION).unwrap().len(), 4);
    assert_eq!(h.service.start_session(&learner).unwrap(), SessionPlan::BankCompleted);

    h.tracker.set_review_mode(VERSION, true).unwrap();
    let SessionPlan::Ready(review) = h.service.start_session(&learner).unwrap() else {
        panic!("review mode allows repeats");
    };
    assert_eq!(review.len(), 3);
    let ids: HashSet<_> = review.iter().map(|q| q.id.clone()).collect();
    assert_eq!(ids.len(), 3);
}

#[test]
fn test_unavailable_pool_is_reported() {
    let h = harness(StaticQuestionPool::unavailable(), 3, false);
    let learner = h.service.resume().unwrap();
    assert!(matches!(
        h.service.start_session(&learner),
        Err(SessionError::SelectionUnavailable(_))
    ));
}

#[test]
fn test_completed_quiz_is_persisted_with_device() {
    let h = harness(bank(10), 5, false);
    let learner = h.service.resume().unwrap();
    let summary = quiz(
        &[
            ("q1", "fiqh", true),
            ("q2", "fiqh", true),
            ("q3", "aqidah", false),
        ],
        Utc::now(),
    );

    let (updated, recommendations) = h.service.complete_quiz(&learner, &summary).unwrap();

    assert_eq!(updated.progress.total_questions_answered, 3);
    assert_eq!(updated.metadata.last_device_id.as_deref(), Some("device-a"));
    assert_eq!(recommendations[0].topic.as_deref(), Some("aqidah"));

    let stored = h.service.store().load_profile(&updated.id).unwrap().unwrap();
    assert_eq!(stored, updated);
    assert_eq!(
        h.service.active_recommendations(&stored, Utc::now()).len(),
        recommendations.len()
    );
    assert!(h
        .service
        .active_recommendations(&stored, Utc::now() + Duration::days(8))
        .is_empty());
}

#[test]
fn test_exam_is_persisted() {
    let h = harness(bank(1), 1, false);
    let learner = h.service.resume().unwrap();
    let exam = ExamSummary {
        total_questions: 20,
        correct_answers: 17,
        percentage: 85.0,
        duration_secs: 600,
        completed_at: Utc::now(),
        passed: true,
    };

    let updated = h.service.complete_exam(&learner, &exam).unwrap();
    assert_eq!(updated.progress.exams_passed, 1);
    assert_eq!(
        h.service
            .store()
            .load_profile(&updated.id)
            .unwrap()
            .unwrap()
            .progress
            .exam_history
            .len(),
        1
    );
}

#[tokio::test]
async fn test_quiz_completion_syncs_in_background() {
    let h = harness(bank(3), 3, true);
    let remote = h.remote.clone().unwrap();
    let learner = h.service.resume().unwrap();

    let (updated, _) = h
        .service
        .complete_quiz(&learner, &quiz(&[("q0", "fiqh", true)], Utc::now()))
        .unwrap();

    let sync = h.service.sync().unwrap();
    let mut status = sync.subscribe();
    tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while remote.get(&updated.id).is_none() || sync.status().state.is_syncing() {
            let _ = tokio::time::timeout(std::time::Duration::from_millis(20), status.changed()).await;
        }
    })
    .await
    .expect("background sync finishes");

    assert_eq!(
        remote.get(&updated.id).unwrap().progress.total_questions_answered,
        1
    );
    assert_eq!(sync.status().state, SyncState::Idle);
}

#[tokio::test]
async fn test_sign_in_pulls_cloud_progress_for_new_device() {
    let h = harness(bank(1), 1, true);
    let remote = h.remote.clone().unwrap();
    let mut cloud = profile("user-42", 60, at(2));
    cloud.display_name = Some("Cloud Name".to_string());
    cloud.progress.topic_progress.insert("fiqh".to_string(), Default::default());
    remote.insert(cloud);

    let identity = Identity {
        id: "user-42".to_string(),
        full_name: None,
        email: Some("user@example.com".to_string()),
        display_name: None,
    };
    let signed_in = h.service.sign_in(&identity).await.unwrap();

    assert!(!signed_in.is_anonymous());
    assert_eq!(signed_in.progress.total_questions_answered, 60);
    assert_eq!(signed_in.display_name.as_deref(), Some("Cloud Name"));
    assert_eq!(h.service.resume().unwrap().id, "user-42");
}

#[tokio::test]
async fn test_sign_in_offline_keeps_local_profile() {
    let h = harness(bank(1), 1, false);
    let identity = Identity {
        id: "user-7".to_string(),
        full_name: Some("Full Name".to_string()),
        email: None,
        display_name: Some("Seven".to_string()),
    };

    let signed_in = h.service.sign_in(&identity).await.unwrap();
    assert_eq!(signed_in.display_name.as_deref(), Some("Seven"));
    assert_eq!(signed_in.progress.total_questions_answered, 0);
}

#[tokio::test]
async fn test_sign_out_discards_cloud_copy_and_returns_to_anonymous() {
    let h = harness(bank(1), 1, true);
    let remote = h.remote.clone().unwrap();
    let identity = Identity {
        id: "user-1".to_string(),
        full_name: None,
        email: None,
        display_name: None,
    };
    let signed_in = h.service.sign_in(&identity).await.unwrap();
    assert!(remote.get("user-1").is_some());

    let anonymous = h.service.sign_out(&signed_in).await.unwrap();

    assert!(anonymous.is_anonymous());
    assert_eq!(h.service.resume().unwrap().id, anonymous.id);
    assert!(remote.get("user-1").is_none());
    assert_eq!(remote.delete_calls.load(Ordering::SeqCst), 1);
    // the device keeps its cached copy
    assert!(h.service.store().load_profile("user-1").unwrap().is_some());
}

#[tokio::test]
async fn test_sign_out_reports_failed_cloud_delete() {
    let h = harness(bank(1), 1, true);
    let remote = h.remote.clone().unwrap();
    let identity = Identity {
        id: "user-2".to_string(),
        full_name: None,
        email: None,
        display_name: None,
    };
    let signed_in = h.service.sign_in(&identity).await.unwrap();
    remote.fail_delete(Some(Failure::Status(500)));

    let result = h.service.sign_out(&signed_in).await;

    assert!(matches!(result, Err(SessionError::Sync(_))));
    assert!(remote.get("user-2").is_some());
    assert_eq!(h.service.resume().unwrap().id, "user-2");
}

#[tokio::test]
async fn test_delete_account_removes_everywhere() {
    let h = harness(bank(2), 2, true);
    let remote = h.remote.clone().unwrap();
    let identity = Identity {
        id: "user-1".to_string(),
        full_name: None,
        email: None,
        display_name: None,
    };
    let signed_in = h.service.sign_in(&identity).await.unwrap();
    h.tracker.mark_used(&["q0".to_string()], VERSION).unwrap();

    let anonymous = h.service.delete_account(&signed_in).await.unwrap();

    assert!(anonymous.is_anonymous());
    assert!(remote.get("user-1").is_none());
    assert!(h.service.store().load_profile("user-1").unwrap().is_none());
    assert!(h.tracker.get_used_ids(VERSION).unwrap().is_empty());

    // a second delete finds nothing remotely and still succeeds
    h.service.delete_account(&signed_in).await.unwrap();
}

#[tokio::test]
async fn test_reset_progress_does_not_resurrect_counters() {
    let h = harness(bank(1), 1, true);
    let remote = h.remote.clone().unwrap();
    let mut cloud = profile("user-3", 75, at(1));
    cloud.progress.overall_mastery_level = MasteryLevel::Proficient;
    remote.insert(cloud);

    let identity = Identity {
        id: "user-3".to_string(),
        full_name: None,
        email: None,
        display_name: None,
    };
    let signed_in = h.service.sign_in(&identity).await.unwrap();
    assert_eq!(signed_in.progress.total_questions_answered, 75);

    let reset = h.service.reset_progress(&signed_in).await.unwrap();

    assert_eq!(reset.id, "user-3");
    assert_eq!(reset.progress.total_questions_answered, 0);
    assert_eq!(
        remote.get("user-3").unwrap().progress.total_questions_answered,
        0
    );
    assert_eq!(
        h.service
            .store()
            .load_profile("user-3")
            .unwrap()
            .unwrap()
            .progress
            .total_questions_answered,
        0
    );
}
