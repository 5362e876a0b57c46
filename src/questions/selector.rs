use std::collections::HashSet;

use rand::rngs::ThreadRng;
use rand::seq::SliceRandom;
use rand::Rng;

use super::Question;
use crate::progress::model::{Difficulty, MasteryLevel, ProgressSnapshot};

/// Picks a quiz batch from a question pool. Selection is a dry run: nothing is
/// marked used here, the caller commits ids once the quiz is completed.
pub struct QuestionSelector<R = ThreadRng> {
    rng: R,
}

impl QuestionSelector<ThreadRng> {
    pub fn new() -> Self {
        Self { rng: rand::rng() }
    }
}

impl Default for QuestionSelector<ThreadRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> QuestionSelector<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Returns at most `session_count` distinct questions. Never fails: when
    /// the pool cannot fill the quota the batch is simply shorter.
    ///
    /// With a progress snapshot the batch is filled tier by tier:
    /// 1. unused questions from weak topics, up to half the quota
    /// 2. unused questions from weak or proficient topics that are not hard
    /// 3. any unused question
    /// 4. previously used questions
    ///
    /// Topics with no recorded progress are not considered weak.
    pub fn select(
        &mut self,
        pool: &[Question],
        progress: Option<&ProgressSnapshot>,
        used_ids: &HashSet<String>,
        session_count: usize,
    ) -> Vec<Question> {
        let mut seen = HashSet::new();
        let (fresh, used): (Vec<&Question>, Vec<&Question>) = pool
            .iter()
            .filter(|q| seen.insert(q.id.as_str()))
            .partition(|q| !used_ids.contains(&q.id));

        let mut batch = Batch::new(session_count);

        match progress {
            None => {
                self.fill(&mut batch, &fresh, session_count, |_| true);
                self.fill(&mut batch, &used, session_count, |_| true);
            }
            Some(progress) => {
                let mastery = |q: &Question| progress.topic_mastery(&q.topic);

                self.fill(&mut batch, &fresh, session_count / 2, |q| {
                    mastery(q).is_some_and(MasteryLevel::is_weak)
                });
                self.fill(&mut batch, &fresh, session_count, |q| {
                    q.difficulty != Difficulty::Hard
                        && mastery(q).is_some_and(|m| m.is_weak() || m == MasteryLevel::Proficient)
                });
                self.fill(&mut batch, &fresh, session_count, |_| true);
                self.fill(&mut batch, &used, session_count, |_| true);
            }
        }

        tracing::debug!(
            requested = session_count,
            selected = batch.questions.len(),
            fresh = fresh.len(),
            used = used.len(),
            "question batch selected"
        );

        let mut questions = batch.questions;
        questions.truncate(session_count);
        questions
    }

    /// Shuffles the matching candidates not yet taken and adds them until the
    /// batch holds `ceiling` questions.
    fn fill(
        &mut self,
        batch: &mut Batch,
        candidates: &[&Question],
        ceiling: usize,
        filter: impl Fn(&Question) -> bool,
    ) {
        let ceiling = ceiling.min(batch.quota);
        if batch.questions.len() >= ceiling {
            return;
        }

        let mut tier: Vec<&Question> = candidates
            .iter()
            .copied()
            .filter(|q| !batch.taken.contains(&q.id) && filter(q))
            .collect();
        tier.shuffle(&mut self.rng);

        for question in tier {
            if batch.questions.len() >= ceiling {
                break;
            }
            batch.taken.insert(question.id.clone());
            batch.questions.push(question.clone());
        }
    }
}

struct Batch {
    quota: usize,
    taken: HashSet<String>,
    questions: Vec<Question>,
}

impl Batch {
    fn new(quota: usize) -> Self {
        Self {
            quota,
            taken: HashSet::new(),
            questions: Vec::with_capacity(quota),
        }
    }
}
