use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Failed(String),
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "IDLE",
            SyncState::Syncing => "SYNCING",
            SyncState::Failed(_) => "FAILED",
        }
    }

    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub from: SyncState,
    pub to: SyncState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Transitions kept for diagnostics; older ones are dropped first.
const TRANSITION_LOG_CAP: usize = 100;

/// Idle, syncing and failed states of the cloud sync indicator. Every
/// failure can be retried, so `failed` only leads back to `syncing`.
#[derive(Debug)]
pub struct SyncStateMachine {
    current: SyncState,
    transitions: Vec<StateTransition>,
}

impl Default for SyncStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStateMachine {
    pub fn new() -> Self {
        Self {
            current: SyncState::Idle,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.current
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn last_change(&self) -> Option<DateTime<Utc>> {
        self.transitions.last().map(|t| t.at)
    }

    pub fn can_transition_to(&self, target: &SyncState) -> bool {
        matches!(
            (&self.current, target),
            (SyncState::Idle, SyncState::Syncing)
                | (SyncState::Failed(_), SyncState::Syncing)
                | (SyncState::Syncing, SyncState::Idle)
                | (SyncState::Syncing, SyncState::Failed(_))
        )
    }

    pub fn transition_to(
        &mut self,
        target: SyncState,
        reason: impl Into<String>,
    ) -> Result<(), TransitionError> {
        if !self.can_transition_to(&target) {
            return Err(TransitionError::Rejected {
                from: self.current.clone(),
                to: target,
            });
        }

        let from = std::mem::replace(&mut self.current, target.clone());
        if self.transitions.len() == TRANSITION_LOG_CAP {
            self.transitions.remove(0);
        }
        self.transitions.push(StateTransition {
            from,
            to: target,
            reason: reason.into(),
            at: Utc::now(),
        });
        Ok(())
    }

    pub fn start_sync(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition_to(SyncState::Syncing, reason)
    }

    pub fn complete(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition_to(SyncState::Idle, reason)
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        let message = message.into();
        self.transition_to(SyncState::Failed(message.clone()), message)
    }
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("sync state cannot move from {} to {}", .from.as_str(), .to.as_str())]
    Rejected { from: SyncState, to: SyncState },
}
