// src/state.rs

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::models::{
    question::Quiz,
    submission::{GradingResult, SubmissionRequest},
};

/// One submission held by the stub grader.
#[derive(Debug, Clone)]
pub struct StoredSubmission {
    pub request: SubmissionRequest,
    /// Status fetches served so far.
    pub polls: u32,
    /// Outcome revealed once the processing phase is over.
    pub result: GradingResult,
}

/// Shared state of the stub grader.
#[derive(Clone)]
pub struct StubState {
    /// Answer key used for scoring.
    pub quiz: Arc<Quiz>,
    pub submissions: Arc<Mutex<HashMap<String, StoredSubmission>>>,
    /// Fetches answered `processing` before the final result.
    pub polls_before_complete: u32,
    /// Report every submission as a grading `error`.
    pub fail_grading: bool,
    /// Bearer token required on every request, if set.
    pub token: Option<String>,
}

impl StubState {
    pub fn new(quiz: Quiz, polls_before_complete: u32) -> Self {
        Self {
            quiz: Arc::new(quiz),
            submissions: Arc::new(Mutex::new(HashMap::new())),
            polls_before_complete,
            fail_grading: false,
            token: None,
        }
    }

    pub fn with_failing_grader(mut self) -> Self {
        self.fail_grading = true;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub async fn submission_count(&self) -> usize {
        self.submissions.lock().await.len()
    }
}
