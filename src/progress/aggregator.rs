use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::progress::model::{
    push_history, Difficulty, ExamHistoryEntry, HistoryEntry, LearnerProfile, MasteryLevel,
    ProgressSnapshot, QuizHistoryEntry, Recommendation, RecommendationKind,
};

/// Quizzes scoring at least this percentage extend the streak.
pub const STREAK_THRESHOLD_PERCENT: f64 = 80.0;
pub const RECOMMENDATION_TTL_DAYS: i64 = 7;
pub const MAX_RECOMMENDATIONS: usize = 3;

const FOCUS_TOPIC_ACCURACY: f64 = 70.0;
const HARDER_DIFFICULTY_SCORE: f64 = 90.0;
const MAINTAIN_STREAK_MIN: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub question_id: String,
    pub topic: String,
    pub difficulty: Difficulty,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSummary {
    pub total_questions: u32,
    pub correct_answers: u32,
    pub percentage: f64,
    pub duration_secs: u64,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub corrected_mistakes: u32,
    #[serde(default)]
    pub difficulty_breakdown: BTreeMap<Difficulty, u32>,
    #[serde(default)]
    pub outcomes: Vec<QuestionOutcome>,
}

impl QuizSummary {
    /// Builds a summary whose totals and difficulty breakdown agree with the
    /// outcome list.
    pub fn from_outcomes(
        outcomes: Vec<QuestionOutcome>,
        duration_secs: u64,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let total_questions = outcomes.len() as u32;
        let correct_answers = outcomes.iter().filter(|o| o.is_correct).count() as u32;
        let percentage = if total_questions == 0 {
            0.0
        } else {
            f64::from(correct_answers) / f64::from(total_questions) * 100.0
        };

        let mut difficulty_breakdown = BTreeMap::new();
        for outcome in &outcomes {
            *difficulty_breakdown.entry(outcome.difficulty).or_insert(0) += 1;
        }

        Self {
            total_questions,
            correct_answers,
            percentage,
            duration_secs,
            completed_at,
            corrected_mistakes: 0,
            difficulty_breakdown,
            outcomes,
        }
    }

    pub fn question_ids(&self) -> Vec<String> {
        self.outcomes.iter().map(|o| o.question_id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSummary {
    pub total_questions: u32,
    pub correct_answers: u32,
    pub percentage: f64,
    pub duration_secs: u64,
    pub completed_at: DateTime<Utc>,
    pub passed: bool,
}

/// Folds a finished quiz into the profile and returns the regenerated
/// recommendations alongside the updated copy.
pub fn apply_quiz_outcome(
    summary: &QuizSummary,
    profile: &LearnerProfile,
) -> (LearnerProfile, Vec<Recommendation>) {
    let mut updated = profile.clone();
    let progress = &mut updated.progress;

    let correct = summary.correct_answers.min(summary.total_questions);
    if correct != summary.correct_answers {
        tracing::warn!(
            total = summary.total_questions,
            correct = summary.correct_answers,
            "quiz summary reports more correct answers than questions; clamping"
        );
    }
    if summary.outcomes.len() != summary.total_questions as usize {
        tracing::warn!(
            total = summary.total_questions,
            outcomes = summary.outcomes.len(),
            "quiz outcome list length differs from reported total; counters follow the totals"
        );
    }

    progress.total_questions_answered = progress
        .total_questions_answered
        .saturating_add(summary.total_questions);
    progress.correct_answers = progress.correct_answers.saturating_add(correct);
    progress.incorrect_answers = progress
        .incorrect_answers
        .saturating_add(summary.total_questions - correct);
    progress.corrected_mistakes = progress
        .corrected_mistakes
        .saturating_add(summary.corrected_mistakes);

    let sessions_before = progress.quiz_history.len() as f64;
    progress.average_quiz_score = (progress.average_quiz_score * sessions_before
        + summary.percentage)
        / (sessions_before + 1.0);

    update_streak(progress, summary.percentage);

    for (&difficulty, &count) in &summary.difficulty_breakdown {
        if count == 0 {
            continue;
        }
        let correct_for_difficulty = summary
            .outcomes
            .iter()
            .filter(|o| o.difficulty == difficulty && o.is_correct)
            .count() as u32;
        progress
            .difficulty_stats
            .entry(difficulty)
            .or_default()
            .record(correct_for_difficulty.min(count), count);
    }

    for outcome in &summary.outcomes {
        progress
            .topic_progress
            .entry(outcome.topic.clone())
            .or_default()
            .record_answer(outcome.is_correct, summary.completed_at);
    }

    older_than_history_head(&progress.quiz_history, summary.completed_at, "quiz");
    push_history(
        &mut progress.quiz_history,
        QuizHistoryEntry {
            completed_at: summary.completed_at,
            total_questions: summary.total_questions,
            correct_answers: correct,
            percentage: summary.percentage,
            duration_secs: summary.duration_secs,
        },
    );

    progress.last_activity_at = Some(summary.completed_at);
    progress.recompute_overall_mastery();
    progress.recommendations = generate_recommendations(progress, summary.completed_at);

    let recommendations = progress.recommendations.clone();
    updated.touch(Utc::now());

    tracing::debug!(
        profile_id = %updated.id,
        total = updated.progress.total_questions_answered,
        average = updated.progress.average_quiz_score,
        mastery = updated.progress.overall_mastery_level.as_str(),
        "quiz outcome applied"
    );

    (updated, recommendations)
}

/// Exams count toward the answer counters and the streak but carry no
/// per-question attribution, so topic and difficulty records are left alone.
/// The quiz average is not moved by exams.
pub fn apply_exam_outcome(summary: &ExamSummary, profile: &LearnerProfile) -> LearnerProfile {
    let mut updated = profile.clone();
    let progress = &mut updated.progress;

    let correct = summary.correct_answers.min(summary.total_questions);
    progress.total_questions_answered = progress
        .total_questions_answered
        .saturating_add(summary.total_questions);
    progress.correct_answers = progress.correct_answers.saturating_add(correct);
    progress.incorrect_answers = progress
        .incorrect_answers
        .saturating_add(summary.total_questions - correct);

    progress.exams_taken = progress.exams_taken.saturating_add(1);
    if summary.passed {
        progress.exams_passed = progress.exams_passed.saturating_add(1);
    }

    update_streak(progress, summary.percentage);

    older_than_history_head(&progress.exam_history, summary.completed_at, "exam");
    push_history(
        &mut progress.exam_history,
        ExamHistoryEntry {
            completed_at: summary.completed_at,
            total_questions: summary.total_questions,
            correct_answers: correct,
            percentage: summary.percentage,
            passed: summary.passed,
            duration_secs: summary.duration_secs,
        },
    );

    progress.last_activity_at = Some(summary.completed_at);
    progress.recompute_overall_mastery();
    progress.recommendations = generate_recommendations(progress, summary.completed_at);
    updated.touch(Utc::now());

    updated
}

fn update_streak(progress: &mut ProgressSnapshot, percentage: f64) {
    if percentage >= STREAK_THRESHOLD_PERCENT {
        progress.current_streak = progress.current_streak.saturating_add(1);
    } else {
        progress.current_streak = 0;
    }
    progress.longest_streak = progress.longest_streak.max(progress.current_streak);
}

/// Rebuilds the advisory list from scratch: weakest topic first, then a nudge
/// toward hard questions, then streak encouragement.
pub fn generate_recommendations(
    progress: &ProgressSnapshot,
    now: DateTime<Utc>,
) -> Vec<Recommendation> {
    let expires_at = Some(now + Duration::days(RECOMMENDATION_TTL_DAYS));
    let mut recommendations = Vec::with_capacity(MAX_RECOMMENDATIONS);

    // strict `<` keeps the first topic in iteration order on ties
    let mut weakest: Option<(&String, f64)> = None;
    for (topic, record) in &progress.topic_progress {
        let accuracy = record.accuracy();
        if accuracy >= FOCUS_TOPIC_ACCURACY {
            continue;
        }
        match weakest {
            Some((_, lowest)) if accuracy >= lowest => {}
            _ => weakest = Some((topic, accuracy)),
        }
    }

    if let Some((topic, accuracy)) = weakest {
        let difficulty = progress
            .topic_progress
            .get(topic)
            .and_then(|t| t.recommended_difficulty);
        recommendations.push(Recommendation {
            kind: RecommendationKind::FocusTopic,
            title: format!("Focus on {topic}"),
            message: format!(
                "Your accuracy in {topic} is {accuracy:.0}%. Practice it a little more."
            ),
            topic: Some(topic.clone()),
            difficulty,
            created_at: now,
            expires_at,
        });
    }

    let ready_for_harder = progress.difficulty_stats.values().any(|stats| {
        stats.mastery_level == MasteryLevel::Expert || stats.adaptive_score > HARDER_DIFFICULTY_SCORE
    });
    if ready_for_harder {
        recommendations.push(Recommendation {
            kind: RecommendationKind::IncreaseDifficulty,
            title: "Try harder questions".to_string(),
            message: "You are doing great. Challenge yourself with hard questions.".to_string(),
            topic: None,
            difficulty: Some(Difficulty::Hard),
            created_at: now,
            expires_at,
        });
    }

    if progress.current_streak >= MAINTAIN_STREAK_MIN {
        recommendations.push(Recommendation {
            kind: RecommendationKind::MaintainStreak,
            title: "Keep your streak going".to_string(),
            message: format!(
                "{} strong quizzes in a row. Keep it up!",
                progress.current_streak
            ),
            topic: None,
            difficulty: None,
            created_at: now,
            expires_at,
        });
    }

    recommendations
}

/// Recommendations whose expiry has not passed yet.
pub fn active_recommendations(progress: &ProgressSnapshot, now: DateTime<Utc>) -> Vec<Recommendation> {
    progress
        .recommendations
        .iter()
        .filter(|r| !r.is_expired(now))
        .cloned()
        .collect()
}

/// Histories are head-inserted, so a summary completed before the current
/// head leaves the list out of order until the next merge re-sorts it.
fn older_than_history_head<T: HistoryEntry>(
    history: &[T],
    completed_at: DateTime<Utc>,
    kind: &str,
) -> bool {
    let Some(head) = history.first().map(HistoryEntry::completed_at) else {
        return false;
    };
    if completed_at >= head {
        return false;
    }
    tracing::warn!(
        kind,
        completed_at = %completed_at,
        newest_recorded = %head,
        "summary is older than the newest history entry; history is out of order until the next merge"
    );
    true
}
