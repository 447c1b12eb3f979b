// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors raised by the quiz-taking session.
///
/// Everything except `Api` is caller misuse and is returned immediately
/// rather than replaced with a default.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Invalid time budget: {0} seconds (must be positive)")]
    InvalidBudget(i64),

    #[error("Answer ledger is already initialized for this attempt")]
    AlreadyInitialized,

    #[error("Unknown question: {0}")]
    UnknownQuestion(String),

    #[error("Duplicate question id: {0}")]
    DuplicateQuestion(String),

    #[error("Answer kind does not match question {0}")]
    AnswerKindMismatch(String),

    #[error("Option {index} out of range for question {question_id} ({options} options)")]
    OptionOutOfRange {
        question_id: String,
        index: usize,
        options: usize,
    },

    #[error("Invalid quiz: {0}")]
    InvalidQuiz(String),

    #[error("Attempt is closed; answers can no longer change")]
    AttemptClosed,

    #[error("Submission retry is not available: {0}")]
    RetryUnavailable(String),

    #[error("Grading API error: {0}")]
    Api(#[from] ApiError),
}

/// Errors from the grading backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Connection refused, timeout, DNS failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The resource does not exist or is not visible to the caller.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Transient errors are retried by the next scheduled poll.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::Decode(_) => true,
            ApiError::Status { status, .. } => *status >= 500,
            ApiError::NotFound(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },

    #[error("Invalid grader URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Errors returned by the stub grader's HTTP handlers.
#[derive(Debug)]
pub enum StubError {
    // 400 Bad Request
    BadRequest(String),

    // 404 Not Found
    NotFound(String),
}

impl std::fmt::Display for StubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for StubError {}

/// Converts the error into a JSON response with the matching status code.
impl IntoResponse for StubError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            StubError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            StubError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ApiError::Transport("refused".to_string()).is_transient());
        assert!(ApiError::Decode("bad json".to_string()).is_transient());
        assert!(
            ApiError::Status {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !ApiError::Status {
                status: 422,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!ApiError::NotFound("s-1".to_string()).is_transient());
    }

    #[test]
    fn test_api_error_converts_into_session_error() {
        let err: SessionError = ApiError::Transport("down".to_string()).into();
        assert!(matches!(err, SessionError::Api(ApiError::Transport(_))));
    }

    #[test]
    fn test_stub_error_status_codes() {
        let response = StubError::NotFound("missing".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = StubError::BadRequest("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
