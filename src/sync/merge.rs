use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::progress::model::{
    DifficultyStats, HistoryEntry, LearnerProfile, ProfileMetadata, ProgressSnapshot,
    TopicProgress, HISTORY_LIMIT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    PreferLocal,
    PreferRemote,
    #[default]
    Newest,
}

impl MergeStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            MergeStrategy::PreferLocal => "prefer_local",
            MergeStrategy::PreferRemote => "prefer_remote",
            MergeStrategy::Newest => "newest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSide {
    Local,
    Remote,
}

/// Reconciles two snapshots of the same learner. Pure and total: both inputs
/// are left untouched and every input pair yields a profile.
pub fn merge(local: &LearnerProfile, remote: &LearnerProfile, strategy: MergeStrategy) -> LearnerProfile {
    match strategy {
        MergeStrategy::PreferLocal => local.clone(),
        MergeStrategy::PreferRemote => remote.clone(),
        MergeStrategy::Newest => merge_newest(local, remote),
    }
}

/// Later `updated_at` wins, local on ties.
pub fn newer_side(local: &LearnerProfile, remote: &LearnerProfile) -> MergeSide {
    if remote.metadata.updated_at > local.metadata.updated_at {
        MergeSide::Remote
    } else {
        MergeSide::Local
    }
}

fn merge_newest(local: &LearnerProfile, remote: &LearnerProfile) -> LearnerProfile {
    let (newer, older) = match newer_side(local, remote) {
        MergeSide::Local => (local, remote),
        MergeSide::Remote => (remote, local),
    };

    // identity, display fields and preferences travel with the newer side
    let mut merged = newer.clone();
    merged.progress = merge_progress(&local.progress, &remote.progress, &newer.progress);
    merged.metadata = ProfileMetadata {
        created_at: newer.metadata.created_at.min(older.metadata.created_at),
        updated_at: newer.metadata.updated_at.max(older.metadata.updated_at),
        last_synced_at: newer.metadata.last_synced_at.max(older.metadata.last_synced_at),
        last_device_id: newer
            .metadata
            .last_device_id
            .clone()
            .or_else(|| older.metadata.last_device_id.clone()),
    };

    merged
}

fn merge_progress(
    local: &ProgressSnapshot,
    remote: &ProgressSnapshot,
    newer: &ProgressSnapshot,
) -> ProgressSnapshot {
    // the quiz average follows whichever side has seen more answers
    let average_source = if remote.total_questions_answered > local.total_questions_answered {
        remote
    } else {
        local
    };

    let mut merged = ProgressSnapshot {
        total_questions_answered: local
            .total_questions_answered
            .max(remote.total_questions_answered),
        correct_answers: local.correct_answers.max(remote.correct_answers),
        incorrect_answers: local.incorrect_answers.max(remote.incorrect_answers),
        corrected_mistakes: local.corrected_mistakes.max(remote.corrected_mistakes),
        exams_taken: local.exams_taken.max(remote.exams_taken),
        exams_passed: local.exams_passed.max(remote.exams_passed),
        current_streak: newer.current_streak,
        longest_streak: local
            .longest_streak
            .max(remote.longest_streak)
            .max(newer.current_streak),
        average_quiz_score: average_source.average_quiz_score,
        last_activity_at: local.last_activity_at.max(remote.last_activity_at),
        overall_mastery_level: newer.overall_mastery_level,
        difficulty_stats: merge_keyed(
            &local.difficulty_stats,
            &remote.difficulty_stats,
            |stats: &DifficultyStats| stats.total_answers,
            DifficultyStats::recompute,
        ),
        topic_progress: merge_keyed(
            &local.topic_progress,
            &remote.topic_progress,
            |topic: &TopicProgress| topic.total_answers,
            TopicProgress::recompute,
        ),
        recommendations: newer.recommendations.clone(),
        quiz_history: union_history(&local.quiz_history, &remote.quiz_history),
        exam_history: union_history(&local.exam_history, &remote.exam_history),
    };

    merged.recompute_overall_mastery();
    merged
}

/// Per-key winner is the record backed by more answers, local on ties. Keys
/// present on one side only are carried over unchanged apart from their
/// derived fields.
fn merge_keyed<K, V>(
    local: &BTreeMap<K, V>,
    remote: &BTreeMap<K, V>,
    weight: impl Fn(&V) -> u32,
    recompute: impl Fn(&mut V),
) -> BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    let mut merged = local.clone();
    for (key, remote_value) in remote {
        match merged.get(key) {
            Some(local_value) if weight(local_value) >= weight(remote_value) => {}
            _ => {
                merged.insert(key.clone(), remote_value.clone());
            }
        }
    }
    for value in merged.values_mut() {
        recompute(value);
    }
    merged
}

fn union_history<T: HistoryEntry>(local: &[T], remote: &[T]) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut entries: Vec<(String, T)> = Vec::with_capacity(local.len() + remote.len());

    for entry in local.iter().chain(remote.iter()) {
        let fingerprint = entry.fingerprint();
        if seen.insert(fingerprint.clone()) {
            entries.push((fingerprint, entry.clone()));
        }
    }

    entries.sort_by(|(fa, a), (fb, b)| {
        b.completed_at()
            .cmp(&a.completed_at())
            .then_with(|| fa.cmp(fb))
    });
    entries.truncate(HISTORY_LIMIT);
    entries.into_iter().map(|(_, entry)| entry).collect()
}
