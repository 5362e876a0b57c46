pub mod aggregator;
pub mod model;

pub use aggregator::{
    active_recommendations, apply_exam_outcome, apply_quiz_outcome, generate_recommendations,
    ExamSummary, QuestionOutcome, QuizSummary,
};
pub use model::*;
