use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Quiz and exam histories keep at most this many entries, newest first.
pub const HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MasteryLevel {
    #[default]
    Novice,
    Learning,
    Proficient,
    Expert,
}

impl MasteryLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            MasteryLevel::Novice => "novice",
            MasteryLevel::Learning => "learning",
            MasteryLevel::Proficient => "proficient",
            MasteryLevel::Expert => "expert",
        }
    }

    /// Accuracy-based level shared by difficulty and topic records.
    pub fn from_accuracy(accuracy: f64) -> Self {
        if accuracy >= 90.0 {
            MasteryLevel::Expert
        } else if accuracy >= 70.0 {
            MasteryLevel::Proficient
        } else if accuracy >= 50.0 {
            MasteryLevel::Learning
        } else {
            MasteryLevel::Novice
        }
    }

    /// Overall level from the running quiz average; inside the proficient band
    /// a streak of five or more promotes to expert.
    pub fn overall(average_quiz_score: f64, current_streak: u32) -> Self {
        if average_quiz_score >= 90.0 {
            MasteryLevel::Expert
        } else if average_quiz_score >= 70.0 {
            if current_streak >= 5 {
                MasteryLevel::Expert
            } else {
                MasteryLevel::Proficient
            }
        } else if average_quiz_score >= 50.0 {
            MasteryLevel::Learning
        } else {
            MasteryLevel::Novice
        }
    }

    pub fn recommended_difficulty(self) -> Difficulty {
        match self {
            MasteryLevel::Novice => Difficulty::Easy,
            MasteryLevel::Learning => Difficulty::Medium,
            MasteryLevel::Proficient | MasteryLevel::Expert => Difficulty::Hard,
        }
    }

    pub fn is_weak(self) -> bool {
        matches!(self, MasteryLevel::Novice | MasteryLevel::Learning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub const fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

fn accuracy_of(correct: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        f64::from(correct) / f64::from(total) * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyStats {
    pub correct_answers: u32,
    pub total_answers: u32,
    pub adaptive_score: f64,
    pub mastery_level: MasteryLevel,
}

impl DifficultyStats {
    pub fn record(&mut self, correct: u32, total: u32) {
        self.correct_answers = self.correct_answers.saturating_add(correct);
        self.total_answers = self.total_answers.saturating_add(total);
        self.recompute();
    }

    pub fn recompute(&mut self) {
        self.adaptive_score = accuracy_of(self.correct_answers, self.total_answers);
        self.mastery_level = MasteryLevel::from_accuracy(self.adaptive_score);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TopicProgress {
    pub correct_answers: u32,
    pub total_answers: u32,
    pub streak: u32,
    pub mastery_level: MasteryLevel,
    pub recommended_difficulty: Option<Difficulty>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl TopicProgress {
    pub fn accuracy(&self) -> f64 {
        accuracy_of(self.correct_answers, self.total_answers)
    }

    pub fn record_answer(&mut self, is_correct: bool, at: DateTime<Utc>) {
        self.total_answers = self.total_answers.saturating_add(1);
        if is_correct {
            self.correct_answers = self.correct_answers.saturating_add(1);
            self.streak = self.streak.saturating_add(1);
        } else {
            self.streak = 0;
        }
        self.last_activity_at = Some(at);
        self.recompute();
    }

    pub fn recompute(&mut self) {
        self.mastery_level = MasteryLevel::from_accuracy(self.accuracy());
        self.recommended_difficulty = Some(self.mastery_level.recommended_difficulty());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    FocusTopic,
    IncreaseDifficulty,
    MaintainStreak,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub title: String,
    pub message: String,
    pub topic: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Recommendation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizHistoryEntry {
    pub completed_at: DateTime<Utc>,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub percentage: f64,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamHistoryEntry {
    pub completed_at: DateTime<Utc>,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub percentage: f64,
    pub passed: bool,
    pub duration_secs: u64,
}

/// History entries are identified by completion time plus a digest of their
/// content, so the same session seen from two devices collapses to one entry.
pub trait HistoryEntry: Clone {
    fn completed_at(&self) -> DateTime<Utc>;
    fn fingerprint(&self) -> String;
}

impl HistoryEntry for QuizHistoryEntry {
    fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"quiz:");
        hasher.update(self.completed_at.timestamp_millis().to_be_bytes());
        hasher.update(self.total_questions.to_be_bytes());
        hasher.update(self.correct_answers.to_be_bytes());
        hasher.update(self.percentage.to_bits().to_be_bytes());
        hasher.update(self.duration_secs.to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

impl HistoryEntry for ExamHistoryEntry {
    fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"exam:");
        hasher.update(self.completed_at.timestamp_millis().to_be_bytes());
        hasher.update(self.total_questions.to_be_bytes());
        hasher.update(self.correct_answers.to_be_bytes());
        hasher.update(self.percentage.to_bits().to_be_bytes());
        hasher.update([u8::from(self.passed)]);
        hasher.update(self.duration_secs.to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Head insertion with the tail dropped past [`HISTORY_LIMIT`].
pub fn push_history<T>(history: &mut Vec<T>, entry: T) {
    history.insert(0, entry);
    history.truncate(HISTORY_LIMIT);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub total_questions_answered: u32,
    pub correct_answers: u32,
    pub incorrect_answers: u32,
    pub corrected_mistakes: u32,
    pub exams_taken: u32,
    pub exams_passed: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub average_quiz_score: f64,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub overall_mastery_level: MasteryLevel,
    #[serde(default)]
    pub difficulty_stats: BTreeMap<Difficulty, DifficultyStats>,
    #[serde(default)]
    pub topic_progress: BTreeMap<String, TopicProgress>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub quiz_history: Vec<QuizHistoryEntry>,
    #[serde(default)]
    pub exam_history: Vec<ExamHistoryEntry>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            total_questions_answered: 0,
            correct_answers: 0,
            incorrect_answers: 0,
            corrected_mistakes: 0,
            exams_taken: 0,
            exams_passed: 0,
            current_streak: 0,
            longest_streak: 0,
            average_quiz_score: 0.0,
            last_activity_at: None,
            overall_mastery_level: MasteryLevel::Novice,
            difficulty_stats: BTreeMap::new(),
            topic_progress: BTreeMap::new(),
            recommendations: Vec::new(),
            quiz_history: Vec::new(),
            exam_history: Vec::new(),
        }
    }
}

impl ProgressSnapshot {
    pub fn recompute_overall_mastery(&mut self) {
        self.overall_mastery_level =
            MasteryLevel::overall(self.average_quiz_score, self.current_streak);
    }

    pub fn topic_mastery(&self, topic: &str) -> Option<MasteryLevel> {
        self.topic_progress.get(topic).map(|t| t.mastery_level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    Anonymous,
    Authenticated,
}

impl AuthMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            AuthMethod::Anonymous => "anonymous",
            AuthMethod::Authenticated => "authenticated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub daily_goal: u32,
    pub preferred_difficulty: Option<Difficulty>,
    pub notifications_enabled: bool,
    #[serde(default)]
    pub preferred_topics: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            daily_goal: 10,
            preferred_difficulty: None,
            notifications_enabled: true,
            preferred_topics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProfile {
    pub id: String,
    pub auth_method: AuthMethod,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub locale: String,
    pub avatar: Option<String>,
    pub progress: ProgressSnapshot,
    pub preferences: Preferences,
    pub metadata: ProfileMetadata,
}

impl LearnerProfile {
    pub fn new(id: impl Into<String>, auth_method: AuthMethod, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            auth_method,
            full_name: None,
            email: None,
            display_name: None,
            locale: "en".to_string(),
            avatar: None,
            progress: ProgressSnapshot::default(),
            preferences: Preferences::default(),
            metadata: ProfileMetadata {
                created_at: now,
                updated_at: now,
                last_synced_at: None,
                last_device_id: None,
            },
        }
    }

    /// Fresh anonymous learner with a generated id.
    pub fn anonymous(now: DateTime<Utc>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), AuthMethod::Anonymous, now)
    }

    pub fn is_anonymous(&self) -> bool {
        self.auth_method == AuthMethod::Anonymous
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.metadata.updated_at {
            self.metadata.updated_at = now;
        }
    }
}
