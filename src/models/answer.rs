// src/models/answer.rs

use serde::{Deserialize, Serialize};

use super::question::{Question, QuestionKind};

/// The value recorded for one question.
///
/// Wire form is untagged: `{"selectedOption": 2}` / `{"selectedOption": null}`
/// for multiple-choice and `{"code": "..."}` for code questions. `Code` is
/// listed first so that a payload carrying `code` is never read as an
/// unanswered choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Code {
        code: String,
    },
    Choice {
        /// `None` is the "unanswered" sentinel, distinct from option 0.
        #[serde(rename = "selectedOption")]
        selected_option: Option<usize>,
    },
}

impl AnswerValue {
    pub fn choice(index: usize) -> Self {
        AnswerValue::Choice {
            selected_option: Some(index),
        }
    }

    pub fn code(source: impl Into<String>) -> Self {
        AnswerValue::Code {
            code: source.into(),
        }
    }

    /// The unanswered value appropriate to a question's kind.
    pub fn unanswered_for(question: &Question) -> Self {
        match question.kind {
            QuestionKind::MultipleChoice { .. } => AnswerValue::Choice {
                selected_option: None,
            },
            QuestionKind::Code { .. } => AnswerValue::Code {
                code: String::new(),
            },
        }
    }

    pub fn is_answered(&self) -> bool {
        match self {
            AnswerValue::Choice { selected_option } => selected_option.is_some(),
            AnswerValue::Code { code } => !code.trim().is_empty(),
        }
    }

    /// Whether this value may be stored for `question`.
    pub fn matches_kind(&self, question: &Question) -> bool {
        matches!(
            (self, &question.kind),
            (AnswerValue::Choice { .. }, QuestionKind::MultipleChoice { .. })
                | (AnswerValue::Code { .. }, QuestionKind::Code { .. })
        )
    }
}

/// One answer, keyed by question id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub question_id: String,

    #[serde(flatten)]
    pub value: AnswerValue,
}

impl AnswerRecord {
    pub fn is_answered(&self) -> bool {
        self.value.is_answered()
    }
}
