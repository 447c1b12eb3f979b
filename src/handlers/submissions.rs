// src/handlers/submissions.rs

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::StubError,
    models::{
        answer::AnswerValue,
        question::{Quiz, QuestionKind},
        submission::{
            AnswerOutcome, ExecutionDetail, GradingResult, GradingStatus, SubmissionReceipt,
            SubmissionRequest,
        },
    },
    state::{StoredSubmission, StubState},
};

/// Scores a submission against the quiz's answer key.
///
/// Multiple choice earns its points when the selected option equals
/// `correctOption`. Code earns its points when non-blank; it is never run.
fn calculate_score(quiz: &Quiz, request: &SubmissionRequest) -> GradingResult {
    let submitted: HashMap<&str, &AnswerValue> = request
        .answers
        .iter()
        .map(|a| (a.question_id.as_str(), &a.value))
        .collect();

    let mut total_score = 0.0;
    let mut max_score = 0.0;
    let mut answers = Vec::with_capacity(quiz.questions.len());

    for question in &quiz.questions {
        let points = f64::from(question.points);
        max_score += points;

        let value = submitted.get(question.id.as_str()).copied();
        let (is_correct, execution) = match (&question.kind, value) {
            (
                QuestionKind::MultipleChoice { correct_option, .. },
                Some(AnswerValue::Choice { selected_option }),
            ) => (
                selected_option.is_some() && *selected_option == *correct_option,
                None,
            ),
            (QuestionKind::Code { test_cases, .. }, Some(answer @ AnswerValue::Code { .. })) => {
                let accepted = answer.is_answered();
                let total_tests = test_cases.len() as u32;
                (
                    accepted,
                    Some(ExecutionDetail {
                        passed_tests: if accepted { total_tests } else { 0 },
                        total_tests,
                        output: None,
                        error: None,
                    }),
                )
            }
            _ => (false, None),
        };

        let score = if is_correct { points } else { 0.0 };
        total_score += score;
        answers.push(AnswerOutcome {
            question_id: question.id.clone(),
            is_correct,
            score,
            execution,
        });
    }

    let percentage = if max_score > 0.0 {
        (total_score / max_score) * 100.0
    } else {
        0.0
    };
    let time_spent = (request.completed_at - request.started_at)
        .num_seconds()
        .max(0) as u64;

    GradingResult {
        status: GradingStatus::Completed,
        total_score: Some(total_score),
        max_score: Some(max_score),
        percentage: Some(percentage),
        time_spent: Some(time_spent),
        answers,
        message: None,
    }
}

/// Accepts a submission and queues it for (simulated) grading.
pub async fn create_submission(
    State(state): State<StubState>,
    Json(req): Json<SubmissionRequest>,
) -> Result<impl IntoResponse, StubError> {
    req.validate()
        .map_err(|e| StubError::BadRequest(e.to_string()))?;

    if req.quiz_id != state.quiz.id {
        return Err(StubError::BadRequest(format!(
            "Unknown quiz '{}'",
            req.quiz_id
        )));
    }

    let result = if state.fail_grading {
        GradingResult {
            message: Some("Grading failed for this submission".to_string()),
            ..GradingResult::with_status(GradingStatus::Error)
        }
    } else {
        calculate_score(&state.quiz, &req)
    };

    let id = Uuid::new_v4().to_string();
    tracing::info!(
        "Submission {} received for quiz {} ({} answers)",
        id,
        req.quiz_id,
        req.answers.len()
    );

    state.submissions.lock().await.insert(
        id.clone(),
        StoredSubmission {
            request: req,
            polls: 0,
            result,
        },
    );

    Ok((StatusCode::CREATED, Json(SubmissionReceipt { id })))
}

/// Reports `processing` for the first few fetches, then the final result.
pub async fn get_submission(
    State(state): State<StubState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StubError> {
    let mut submissions = state.submissions.lock().await;
    let stored = submissions
        .get_mut(&id)
        .ok_or_else(|| StubError::NotFound(format!("Submission '{}' not found", id)))?;

    if stored.polls < state.polls_before_complete {
        stored.polls += 1;
        tracing::debug!("Submission {} still processing ({})", id, stored.polls);
        return Ok(Json(GradingResult::with_status(GradingStatus::Processing)));
    }

    Ok(Json(stored.result.clone()))
}
