// src/models/submission.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::answer::AnswerRecord;

/// Body of `POST /submissions`. Built exactly once per attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    #[validate(length(min = 1, max = 100))]
    pub quiz_id: String,

    #[validate(length(min = 1))]
    pub answers: Vec<AnswerRecord>,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,
}

/// Response of `POST /submissions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub id: String,
}

/// What fired the submission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitReason {
    Manual,
    Expired,
}

/// Lifecycle status of a grading job as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingStatus {
    Processing,
    Submitted,
    Completed,
    Error,
}

impl GradingStatus {
    /// `processing` and `submitted` both mean the job is still running.
    pub fn is_grading(self) -> bool {
        matches!(self, GradingStatus::Processing | GradingStatus::Submitted)
    }
}

/// Response of `GET /submissions/{id}`. Read-only on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingResult {
    pub status: GradingStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,

    /// Seconds between start and completion of the attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<AnswerOutcome>,

    /// Grader-provided explanation, usually present with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GradingResult {
    /// A bare status payload with no scores.
    pub fn with_status(status: GradingStatus) -> Self {
        Self {
            status,
            total_score: None,
            max_score: None,
            percentage: None,
            time_spent: None,
            answers: Vec::new(),
            message: None,
        }
    }
}

/// Per-question grading outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    pub question_id: String,
    pub is_correct: bool,
    pub score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionDetail>,
}

/// Execution detail for code questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDetail {
    pub passed_tests: u32,
    pub total_tests: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_payload_parses_without_scores() {
        let result: GradingResult = serde_json::from_str(r#"{"status":"processing"}"#).unwrap();
        assert_eq!(result.status, GradingStatus::Processing);
        assert!(result.status.is_grading());
        assert!(result.total_score.is_none());
        assert!(result.answers.is_empty());
    }

    #[test]
    fn test_completed_payload_parses() {
        let result: GradingResult = serde_json::from_value(serde_json::json!({
            "status": "completed",
            "totalScore": 15.0,
            "maxScore": 20.0,
            "percentage": 75.0,
            "timeSpent": 42,
            "answers": [
                { "questionId": "q1", "isCorrect": true, "score": 5.0 },
                {
                    "questionId": "q2",
                    "isCorrect": false,
                    "score": 10.0,
                    "execution": { "passedTests": 2, "totalTests": 3, "error": "timeout" }
                }
            ]
        }))
        .unwrap();

        assert_eq!(result.status, GradingStatus::Completed);
        assert_eq!(result.time_spent, Some(42));
        assert_eq!(result.answers.len(), 2);
        let execution = result.answers[1].execution.as_ref().unwrap();
        assert_eq!(execution.passed_tests, 2);
        assert_eq!(execution.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(serde_json::from_str::<GradingResult>(r#"{"status":"queued"}"#).is_err());
    }

    #[test]
    fn test_request_uses_camel_case() {
        let now = Utc::now();
        let request = SubmissionRequest {
            quiz_id: "quiz".to_string(),
            answers: vec![],
            started_at: now,
            completed_at: now,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["quizId"], "quiz");
        assert!(json.get("completedAt").is_some());
        assert!(request.validate().is_err(), "empty answer list is invalid");
    }
}
