pub mod pool;
pub mod selector;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::progress::model::Difficulty;
use crate::storage::StorageResult;

pub use pool::JsonQuestionPool;
pub use selector::QuestionSelector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub topic: String,
    pub difficulty: Difficulty,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_index: usize,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no question bank for language '{language}' at {path}")]
    NotFound { language: String, path: String },

    #[error("failed to read question bank: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed question bank: {0}")]
    Decode(#[from] serde_json::Error),
}

pub trait QuestionPoolProvider: Send + Sync {
    fn load_questions(&self, language: &str) -> Result<Vec<Question>, PoolError>;
}

/// Versioned record of question ids already shown in completed quizzes.
/// Asking with a version other than the stored one empties the set first.
pub trait UsedQuestionTracker: Send + Sync {
    fn get_used_ids(&self, version: i64) -> StorageResult<HashSet<String>>;
    fn mark_used(&self, ids: &[String], version: i64) -> StorageResult<()>;
    fn is_review_mode(&self, version: i64) -> StorageResult<bool>;
    fn reset(&self, version: i64) -> StorageResult<()>;
}
