use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::progress::{
    active_recommendations, apply_exam_outcome, apply_quiz_outcome, AuthMethod, ExamSummary,
    LearnerProfile, ProgressSnapshot, QuizSummary, Recommendation,
};
use crate::questions::{PoolError, Question, QuestionPoolProvider, QuestionSelector, UsedQuestionTracker};
use crate::storage::{LocalStore, SqliteProfileStore, StorageError};
use crate::sync::{MergeStrategy, SyncError, SyncOrchestrator};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("question selection unavailable: {0}")]
    SelectionUnavailable(#[from] PoolError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionPlan {
    Ready(Vec<Question>),
    /// Every question in the bank has been used and review mode is off.
    BankCompleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub language: String,
    pub bank_version: i64,
    pub session_question_count: usize,
    pub device_id: String,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            language: config.language.clone(),
            bank_version: config.question_bank_version,
            session_question_count: config.session_question_count,
            device_id: config.device_id.clone(),
        }
    }
}

/// Ties quizzes, local persistence and cloud sync together for one device.
/// Every mutation is written locally before it returns; cloud sync follows in
/// the background when a remote is configured.
pub struct ProgressService {
    store: SqliteProfileStore,
    tracker: Arc<dyn UsedQuestionTracker>,
    pool: Arc<dyn QuestionPoolProvider>,
    sync: Option<SyncOrchestrator>,
    settings: SessionSettings,
}

impl ProgressService {
    pub fn new(
        store: SqliteProfileStore,
        tracker: Arc<dyn UsedQuestionTracker>,
        pool: Arc<dyn QuestionPoolProvider>,
        sync: Option<SyncOrchestrator>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            tracker,
            pool,
            sync,
            settings,
        }
    }

    pub fn store(&self) -> &SqliteProfileStore {
        &self.store
    }

    pub fn sync(&self) -> Option<&SyncOrchestrator> {
        self.sync.as_ref()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Profile to resume on start: the last active one, else the anonymous one.
    pub fn resume(&self) -> SessionResult<LearnerProfile> {
        Ok(self.store.load_active_profile()?)
    }

    pub fn start_session(&self, profile: &LearnerProfile) -> SessionResult<SessionPlan> {
        let version = self.settings.bank_version;
        let pool = self.pool.load_questions(&self.settings.language)?;
        let used = self.tracker.get_used_ids(version)?;

        let has_unused = pool.iter().any(|q| !used.contains(&q.id));
        if !pool.is_empty() && !has_unused && !self.tracker.is_review_mode(version)? {
            tracing::info!(profile_id = %profile.id, pool = pool.len(), "question bank completed");
            return Ok(SessionPlan::BankCompleted);
        }

        let batch = QuestionSelector::new().select(
            &pool,
            Some(&profile.progress),
            &used,
            self.settings.session_question_count,
        );
        Ok(SessionPlan::Ready(batch))
    }

    /// Commits the quiz's question ids as used, folds the result into the
    /// profile and persists it before scheduling a sync.
    pub fn complete_quiz(
        &self,
        profile: &LearnerProfile,
        summary: &QuizSummary,
    ) -> SessionResult<(LearnerProfile, Vec<Recommendation>)> {
        self.tracker
            .mark_used(&summary.question_ids(), self.settings.bank_version)?;

        let (mut updated, recommendations) = apply_quiz_outcome(summary, profile);
        updated.metadata.last_device_id = Some(self.settings.device_id.clone());
        self.persist(&updated)?;

        Ok((updated, recommendations))
    }

    pub fn complete_exam(
        &self,
        profile: &LearnerProfile,
        summary: &ExamSummary,
    ) -> SessionResult<LearnerProfile> {
        let mut updated = apply_exam_outcome(summary, profile);
        updated.metadata.last_device_id = Some(self.settings.device_id.clone());
        self.persist(&updated)?;
        Ok(updated)
    }

    /// Starts the learner over with the same identity. The empty snapshot is
    /// pushed with `prefer_local` so the old counters are not merged back in.
    pub async fn reset_progress(&self, profile: &LearnerProfile) -> SessionResult<LearnerProfile> {
        let mut fresh = profile.clone();
        fresh.progress = ProgressSnapshot::default();
        fresh.metadata.last_device_id = Some(self.settings.device_id.clone());
        fresh.touch(Utc::now());

        if let Some(sync) = &self.sync {
            sync.cancel_sync();
        }
        self.store.save_profile(&fresh)?;
        tracing::info!(profile_id = %fresh.id, "progress reset");

        match &self.sync {
            Some(sync) => match sync.refresh_from_cloud(&fresh, MergeStrategy::PreferLocal).await {
                Ok(report) => Ok(report.profile),
                Err(e) => {
                    tracing::warn!(profile_id = %fresh.id, error = %e, "reset saved locally, cloud copy not updated");
                    Ok(fresh)
                }
            },
            None => Ok(fresh),
        }
    }

    /// Loads or creates the authenticated profile, makes it active and pulls
    /// the cloud copy. A failed pull leaves the local profile in use.
    pub async fn sign_in(&self, identity: &Identity) -> SessionResult<LearnerProfile> {
        // a profile new to this device must not outrank the cloud copy just
        // because it was created a moment ago
        let (mut profile, strategy) = match self.store.load_profile(&identity.id)? {
            Some(profile) => (profile, MergeStrategy::Newest),
            None => (
                LearnerProfile::new(identity.id.clone(), AuthMethod::Authenticated, Utc::now()),
                MergeStrategy::PreferRemote,
            ),
        };
        profile.auth_method = AuthMethod::Authenticated;
        if identity.full_name.is_some() {
            profile.full_name = identity.full_name.clone();
        }
        if identity.email.is_some() {
            profile.email = identity.email.clone();
        }
        if identity.display_name.is_some() {
            profile.display_name = identity.display_name.clone();
        }

        self.store.save_profile(&profile)?;
        self.store.set_active_profile(&profile.id)?;
        tracing::info!(profile_id = %profile.id, "signed in");

        match &self.sync {
            Some(sync) => match sync.refresh_from_cloud(&profile, strategy).await {
                Ok(report) => Ok(report.profile),
                Err(e) => {
                    tracing::warn!(profile_id = %profile.id, error = %e, "cloud refresh failed on sign-in");
                    Ok(profile)
                }
            },
            None => Ok(profile),
        }
    }

    /// Stops any sync work, discards the signed-in profile's cloud copy and
    /// switches back to the anonymous profile. The local copy stays cached on
    /// this device. A cloud copy that is already gone counts as discarded.
    pub async fn sign_out(&self, profile: &LearnerProfile) -> SessionResult<LearnerProfile> {
        if let Some(sync) = &self.sync {
            sync.cancel_sync();
            sync.delete_remote_profile(&profile.id).await?;
        }
        let anonymous = self.store.load_or_create_anonymous_profile()?;
        self.store.set_active_profile(&anonymous.id)?;
        tracing::info!(profile_id = %profile.id, "signed out");
        Ok(anonymous)
    }

    /// Removes the profile everywhere. A cloud copy that is already gone
    /// counts as deleted.
    pub async fn delete_account(&self, profile: &LearnerProfile) -> SessionResult<LearnerProfile> {
        if let Some(sync) = &self.sync {
            sync.cancel_sync();
            sync.delete_remote_profile(&profile.id).await?;
        }
        self.store.delete_profile(&profile.id)?;
        self.tracker.reset(self.settings.bank_version)?;

        let anonymous = self.store.load_or_create_anonymous_profile()?;
        self.store.set_active_profile(&anonymous.id)?;
        tracing::info!(profile_id = %profile.id, "account deleted");
        Ok(anonymous)
    }

    pub fn active_recommendations(
        &self,
        profile: &LearnerProfile,
        now: DateTime<Utc>,
    ) -> Vec<Recommendation> {
        active_recommendations(&profile.progress, now)
    }

    fn persist(&self, profile: &LearnerProfile) -> SessionResult<()> {
        self.store.save_profile(profile)?;
        if let Some(sync) = &self.sync {
            sync.schedule_sync(&profile.id);
        }
        Ok(())
    }
}
