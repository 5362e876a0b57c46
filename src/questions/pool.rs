use std::path::{Path, PathBuf};

use super::{PoolError, Question, QuestionPoolProvider};

/// Reads `questions_<language>.json` (a JSON array of questions) from a
/// directory on every call, so edits to the bank are picked up without a
/// restart.
#[derive(Debug, Clone)]
pub struct JsonQuestionPool {
    dir: PathBuf,
}

impl JsonQuestionPool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bank_path(&self, language: &str) -> PathBuf {
        self.dir.join(format!("questions_{language}.json"))
    }
}

impl QuestionPoolProvider for JsonQuestionPool {
    fn load_questions(&self, language: &str) -> Result<Vec<Question>, PoolError> {
        let path = self.bank_path(language);
        if !path.exists() {
            return Err(PoolError::NotFound {
                language: language.to_string(),
                path: path.display().to_string(),
            });
        }

        let raw = std::fs::read_to_string(&path)?;
        let questions: Vec<Question> = serde_json::from_str(&raw)?;
        tracing::debug!(language, count = questions.len(), "question bank loaded");
        Ok(questions)
    }
}
