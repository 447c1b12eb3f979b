// src/session/ledger.rs

use std::collections::HashMap;

use crate::{
    error::{Result, SessionError},
    models::{
        answer::{AnswerRecord, AnswerValue},
        question::Question,
    },
};

/// Shape constraints for one slot, captured at initialization.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Choice { options: usize },
    Code,
}

/// Authoritative in-memory answers for the active attempt.
///
/// Holds exactly one record per question, in question order, from
/// `initialize` until the ledger is dropped. Records are overwritten, never
/// removed. The answered count is maintained on every write.
#[derive(Debug, Default)]
pub struct AnswerLedger {
    records: Vec<AnswerRecord>,
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    answered: usize,
    initialized: bool,
}

impl AnswerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one unanswered record per question. Only once per attempt.
    pub fn initialize(&mut self, questions: &[Question]) -> Result<()> {
        if self.initialized {
            return Err(SessionError::AlreadyInitialized);
        }

        let mut index = HashMap::with_capacity(questions.len());
        for (position, question) in questions.iter().enumerate() {
            if index.insert(question.id.clone(), position).is_some() {
                return Err(SessionError::DuplicateQuestion(question.id.clone()));
            }
        }

        self.records = questions
            .iter()
            .map(|q| AnswerRecord {
                question_id: q.id.clone(),
                value: AnswerValue::unanswered_for(q),
            })
            .collect();
        self.slots = questions
            .iter()
            .map(|q| match q.option_count() {
                Some(options) => Slot::Choice { options },
                None => Slot::Code,
            })
            .collect();
        self.index = index;
        self.answered = 0;
        self.initialized = true;
        Ok(())
    }

    /// Replaces the record for `question_id` (last write wins).
    pub fn set_answer(&mut self, question_id: &str, value: AnswerValue) -> Result<()> {
        let position = self.position(question_id)?;

        match (self.slots[position], &value) {
            (Slot::Choice { options }, AnswerValue::Choice { selected_option }) => {
                if let Some(index) = *selected_option {
                    if index >= options {
                        return Err(SessionError::OptionOutOfRange {
                            question_id: question_id.to_string(),
                            index,
                            options,
                        });
                    }
                }
            }
            (Slot::Code, AnswerValue::Code { .. }) => {}
            _ => return Err(SessionError::AnswerKindMismatch(question_id.to_string())),
        }

        let record = &mut self.records[position];
        let was_answered = record.is_answered();
        record.value = value;
        let now_answered = record.is_answered();

        match (was_answered, now_answered) {
            (false, true) => self.answered += 1,
            (true, false) => self.answered -= 1,
            _ => {}
        }
        Ok(())
    }

    /// Resets `question_id` to its unanswered sentinel.
    pub fn clear_answer(&mut self, question_id: &str) -> Result<()> {
        let position = self.position(question_id)?;
        let blank = match self.slots[position] {
            Slot::Choice { .. } => AnswerValue::Choice {
                selected_option: None,
            },
            Slot::Code => AnswerValue::code(""),
        };
        self.set_answer(question_id, blank)
    }

    pub fn is_answered(&self, question_id: &str) -> Result<bool> {
        let position = self.position(question_id)?;
        Ok(self.records[position].is_answered())
    }

    pub fn get(&self, question_id: &str) -> Option<&AnswerRecord> {
        self.index.get(question_id).map(|&i| &self.records[i])
    }

    pub fn answered_count(&self) -> usize {
        self.answered
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Owned copy of all records in question order.
    pub fn snapshot(&self) -> Vec<AnswerRecord> {
        self.records.clone()
    }

    fn position(&self, question_id: &str) -> Result<usize> {
        self.index
            .get(question_id)
            .copied()
            .ok_or_else(|| SessionError::UnknownQuestion(question_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::QuestionKind;

    fn questions() -> Vec<Question> {
        vec![
            Question {
                id: "mc".to_string(),
                content: "Pick".to_string(),
                points: 1,
                kind: QuestionKind::MultipleChoice {
                    options: vec!["a".to_string(), "b".to_string(), "c".to_string()],
                    correct_option: None,
                },
            },
            Question {
                id: "code".to_string(),
                content: "Write".to_string(),
                points: 2,
                kind: QuestionKind::Code {
                    language: "python".to_string(),
                    test_cases: vec![],
                },
            },
        ]
    }

    fn ledger() -> AnswerLedger {
        let mut ledger = AnswerLedger::new();
        ledger.initialize(&questions()).unwrap();
        ledger
    }

    #[test]
    fn test_initialize_seeds_sentinels() {
        let ledger = ledger();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.answered_count(), 0);
        assert_eq!(
            ledger.get("mc").unwrap().value,
            AnswerValue::Choice {
                selected_option: None
            }
        );
        assert_eq!(ledger.get("code").unwrap().value, AnswerValue::code(""));
    }

    #[test]
    fn test_initialize_twice_fails() {
        let mut ledger = ledger();
        assert_eq!(
            ledger.initialize(&questions()),
            Err(SessionError::AlreadyInitialized)
        );
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut qs = questions();
        qs[1].id = "mc".to_string();
        let mut ledger = AnswerLedger::new();
        assert_eq!(
            ledger.initialize(&qs),
            Err(SessionError::DuplicateQuestion("mc".to_string()))
        );
        assert!(!ledger.is_initialized());
    }

    #[test]
    fn test_unknown_question_rejected() {
        let mut ledger = ledger();
        assert_eq!(
            ledger.set_answer("nope", AnswerValue::choice(0)),
            Err(SessionError::UnknownQuestion("nope".to_string()))
        );
        assert!(ledger.is_answered("nope").is_err());
    }

    #[test]
    fn test_kind_and_range_checked() {
        let mut ledger = ledger();
        assert_eq!(
            ledger.set_answer("mc", AnswerValue::code("x")),
            Err(SessionError::AnswerKindMismatch("mc".to_string()))
        );
        assert!(matches!(
            ledger.set_answer("mc", AnswerValue::choice(3)),
            Err(SessionError::OptionOutOfRange { index: 3, .. })
        ));
        assert_eq!(ledger.answered_count(), 0);
    }

    #[test]
    fn test_option_zero_counts_as_answered() {
        let mut ledger = ledger();
        ledger.set_answer("mc", AnswerValue::choice(0)).unwrap();
        assert!(ledger.is_answered("mc").unwrap());
        assert_eq!(ledger.answered_count(), 1);
    }

    #[test]
    fn test_answered_count_tracks_every_write() {
        let mut ledger = ledger();

        ledger.set_answer("code", AnswerValue::code("print(1)")).unwrap();
        assert_eq!(ledger.answered_count(), 1);

        ledger.set_answer("code", AnswerValue::code("print(2)")).unwrap();
        assert_eq!(ledger.answered_count(), 1);

        ledger.set_answer("code", AnswerValue::code("   ")).unwrap();
        assert_eq!(ledger.answered_count(), 0);
        assert!(!ledger.is_answered("code").unwrap());

        ledger.set_answer("mc", AnswerValue::choice(2)).unwrap();
        ledger.clear_answer("mc").unwrap();
        assert_eq!(ledger.answered_count(), 0);
    }

    #[test]
    fn test_snapshot_is_last_write_wins_and_full_length() {
        let mut ledger = ledger();
        let writes = [
            ("mc", AnswerValue::choice(1)),
            ("code", AnswerValue::code("a")),
            ("mc", AnswerValue::choice(2)),
            ("mc", AnswerValue::choice(0)),
            ("code", AnswerValue::code("b")),
        ];
        for (id, value) in writes {
            ledger.set_answer(id, value).unwrap();
            assert_eq!(ledger.snapshot().len(), 2);
        }

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot[0].question_id, "mc");
        assert_eq!(snapshot[0].value, AnswerValue::choice(0));
        assert_eq!(snapshot[1].question_id, "code");
        assert_eq!(snapshot[1].value, AnswerValue::code("b"));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut ledger = ledger();
        let before = ledger.snapshot();
        ledger.set_answer("mc", AnswerValue::choice(1)).unwrap();
        assert!(!before[0].is_answered());
    }
}
