#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use progress_sync::progress::{AuthMethod, Difficulty, LearnerProfile, QuestionOutcome, QuizSummary};
use progress_sync::questions::{PoolError, Question, QuestionPoolProvider};
use progress_sync::storage::{DatabaseManager, SqliteProfileStore, SqliteUsedQuestionTracker};
use progress_sync::sync::{RemoteError, RemoteResult, RemoteStore};

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
}

pub fn profile(id: &str, total: u32, updated_at: DateTime<Utc>) -> LearnerProfile {
    let mut profile = LearnerProfile::new(id, AuthMethod::Authenticated, at(0));
    profile.progress.total_questions_answered = total;
    profile.progress.correct_answers = total;
    profile.metadata.updated_at = updated_at;
    profile
}

pub fn question(id: &str, topic: &str, difficulty: Difficulty) -> Question {
    Question {
        id: id.to_string(),
        topic: topic.to_string(),
        difficulty,
        prompt: format!("{id}?"),
        options: vec!["a".to_string(), "b".to_string()],
        correct_index: 0,
        explanation: None,
    }
}

pub fn quiz(answers: &[(&str, &str, bool)], completed_at: DateTime<Utc>) -> QuizSummary {
    let outcomes = answers
        .iter()
        .map(|(id, topic, is_correct)| QuestionOutcome {
            question_id: id.to_string(),
            topic: topic.to_string(),
            difficulty: Difficulty::Medium,
            is_correct: *is_correct,
        })
        .collect();
    QuizSummary::from_outcomes(outcomes, 90, completed_at)
}

pub fn sqlite_stores() -> (SqliteProfileStore, SqliteUsedQuestionTracker) {
    let db = DatabaseManager::in_memory().expect("in-memory db");
    (
        SqliteProfileStore::new(db.clone()),
        SqliteUsedQuestionTracker::new(db),
    )
}

/// Failure the in-memory remote reports on its next calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Network,
    Decode,
    Status(u16),
}

impl Failure {
    fn error(self) -> RemoteError {
        match self {
            Failure::Network => RemoteError::Network("connection refused".to_string()),
            Failure::Decode => RemoteError::Decode("expected value at line 1".to_string()),
            Failure::Status(status) => RemoteError::Status {
                status,
                message: "injected".to_string(),
            },
        }
    }
}

/// Remote store kept in memory, with injectable failures and latency and
/// counters for the calls it served.
#[derive(Default)]
pub struct MemoryRemoteStore {
    profiles: Mutex<HashMap<String, LearnerProfile>>,
    fetch_failure: Mutex<Option<Failure>>,
    save_failure: Mutex<Option<Failure>>,
    delete_failure: Mutex<Option<Failure>>,
    fetch_failures_for: Mutex<HashMap<String, Failure>>,
    delays_for: Mutex<HashMap<String, Duration>>,
    delay: Mutex<Option<Duration>>,
    stamp_sync_time: Mutex<Option<DateTime<Utc>>>,
    pub fetch_calls: AtomicUsize,
    pub save_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, profile: LearnerProfile) {
        self.profiles.lock().insert(profile.id.clone(), profile);
    }

    pub fn get(&self, id: &str) -> Option<LearnerProfile> {
        self.profiles.lock().get(id).cloned()
    }

    pub fn fail_fetch(&self, failure: Option<Failure>) {
        *self.fetch_failure.lock() = failure;
    }

    pub fn fail_save(&self, failure: Option<Failure>) {
        *self.save_failure.lock() = failure;
    }

    pub fn fail_delete(&self, failure: Option<Failure>) {
        *self.delete_failure.lock() = failure;
    }

    /// Fails every fetch of one profile id, leaving the others alone.
    pub fn fail_fetch_for(&self, id: &str, failure: Failure) {
        self.fetch_failures_for.lock().insert(id.to_string(), failure);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Latency for calls on one profile id, in place of the shared delay.
    pub fn set_delay_for(&self, id: &str, delay: Duration) {
        self.delays_for.lock().insert(id.to_string(), delay);
    }

    /// Server-side `last_synced_at` written into every saved copy.
    pub fn stamp_sync_time(&self, at: Option<DateTime<Utc>>) {
        *self.stamp_sync_time.lock() = at;
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, id: &str) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        let own = self.delays_for.lock().get(id).copied();
        let delay = own.or(*self.delay.lock());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        guard
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch_profile(&self, id: &str) -> RemoteResult<Option<LearnerProfile>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let _flight = self.enter(id).await;
        let own = self.fetch_failures_for.lock().get(id).copied();
        let failure = own.or(*self.fetch_failure.lock());
        if let Some(failure) = failure {
            return Err(failure.error());
        }
        Ok(self.get(id))
    }

    async fn save_profile(&self, profile: &LearnerProfile) -> RemoteResult<LearnerProfile> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        let _flight = self.enter(&profile.id).await;
        let failure = *self.save_failure.lock();
        if let Some(failure) = failure {
            return Err(failure.error());
        }

        let mut confirmed = profile.clone();
        let stamp = *self.stamp_sync_time.lock();
        if let Some(stamp) = stamp {
            confirmed.metadata.last_synced_at = Some(stamp);
        }
        self.insert(confirmed.clone());
        Ok(confirmed)
    }

    async fn delete_profile(&self, id: &str) -> RemoteResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let _flight = self.enter(id).await;
        let failure = *self.delete_failure.lock();
        if let Some(failure) = failure {
            return Err(failure.error());
        }
        self.profiles.lock().remove(id);
        Ok(())
    }
}

/// Fixed question bank; `None` simulates an unavailable pool.
pub struct StaticQuestionPool {
    questions: Option<Vec<Question>>,
}

impl StaticQuestionPool {
    pub fn new(questions: Vec<Question>) -> Arc<Self> {
        Arc::new(Self {
            questions: Some(questions),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self { questions: None })
    }
}

impl QuestionPoolProvider for StaticQuestionPool {
    fn load_questions(&self, language: &str) -> Result<Vec<Question>, PoolError> {
        self.questions.clone().ok_or_else(|| PoolError::NotFound {
            language: language.to_string(),
            path: "<static>".to_string(),
        })
    }
}

/// Polls until the remote has a call in flight.
pub async fn wait_for_in_flight(remote: &MemoryRemoteStore) {
    for _ in 0..200 {
        if remote.in_flight() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("remote call never started");
}
