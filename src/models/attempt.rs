// src/models/attempt.rs

use chrono::{DateTime, Utc};

use super::{
    answer::AnswerRecord,
    question::{Question, Quiz},
    submission::SubmissionRequest,
};

/// One user's run through a fixed snapshot of a quiz.
///
/// The question set, order and options are copied at start time, so later
/// edits to the source `Quiz` do not reach a running attempt. Fields are
/// private; there is no way to mutate an attempt after construction.
#[derive(Debug, Clone)]
pub struct Attempt {
    quiz_id: String,
    title: String,
    questions: Vec<Question>,
    time_limit_seconds: i64,
    started_at: DateTime<Utc>,
}

impl Attempt {
    pub fn from_quiz(quiz: &Quiz, started_at: DateTime<Utc>) -> Self {
        Self {
            quiz_id: quiz.id.clone(),
            title: quiz.title.clone(),
            questions: quiz.questions.clone(),
            time_limit_seconds: quiz.time_limit_seconds,
            started_at,
        }
    }

    pub fn quiz_id(&self) -> &str {
        &self.quiz_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn time_limit_seconds(&self) -> i64 {
        self.time_limit_seconds
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn max_score(&self) -> u32 {
        self.questions.iter().map(|q| q.points).sum()
    }

    pub(crate) fn build_request(
        &self,
        answers: Vec<AnswerRecord>,
        completed_at: DateTime<Utc>,
    ) -> SubmissionRequest {
        SubmissionRequest {
            quiz_id: self.quiz_id.clone(),
            answers,
            started_at: self.started_at,
            completed_at,
        }
    }
}
