// src/models/question.rs

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// A quiz definition as loaded by the client before an attempt starts.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = validate_question_ids))]
pub struct Quiz {
    #[validate(length(min = 1, max = 100))]
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Time budget for one attempt. Non-positive values are rejected when the
    /// clock starts, not here, so the caller sees `InvalidBudget`.
    pub time_limit_seconds: i64,

    #[validate(length(min = 1), nested)]
    pub questions: Vec<Question>,
}

/// A single question snapshot. Immutable for the lifetime of an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[validate(length(min = 1, max = 100))]
    pub id: String,

    /// The text content of the question.
    #[validate(length(min = 1, max = 10_000))]
    pub content: String,

    pub points: u32,

    #[serde(flatten)]
    #[validate(custom(function = validate_kind))]
    pub kind: QuestionKind,
}

/// Kind-specific fields. Serialized with a `kind` tag next to the common fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice {
        options: Vec<String>,

        /// Answer key. Only the stub grader reads it.
        #[serde(
            default,
            rename = "correctOption",
            skip_serializing_if = "Option::is_none"
        )]
        correct_option: Option<usize>,
    },
    Code {
        language: String,

        #[serde(default, rename = "testCases")]
        test_cases: Vec<TestCase>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

impl Question {
    pub fn is_code(&self) -> bool {
        matches!(self.kind, QuestionKind::Code { .. })
    }

    /// Number of options for multiple-choice questions, `None` for code.
    pub fn option_count(&self) -> Option<usize> {
        match &self.kind {
            QuestionKind::MultipleChoice { options, .. } => Some(options.len()),
            QuestionKind::Code { .. } => None,
        }
    }
}

fn validate_kind(kind: &QuestionKind) -> Result<(), ValidationError> {
    match kind {
        QuestionKind::MultipleChoice {
            options,
            correct_option,
        } => {
            if options.len() < 2 {
                return Err(ValidationError::new("too_few_options"));
            }
            if options.iter().any(|opt| opt.trim().is_empty()) {
                return Err(ValidationError::new("blank_option"));
            }
            if matches!(correct_option, Some(idx) if *idx >= options.len()) {
                return Err(ValidationError::new("correct_option_out_of_range"));
            }
            Ok(())
        }
        QuestionKind::Code { language, .. } => {
            if language.trim().is_empty() {
                return Err(ValidationError::new("missing_language"));
            }
            Ok(())
        }
    }
}

fn validate_question_ids(quiz: &Quiz) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for question in &quiz.questions {
        if !seen.insert(question.id.as_str()) {
            return Err(ValidationError::new("duplicate_question_id"));
        }
    }
    Ok(())
}
