// src/session/controller.rs

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicU64, Ordering},
};

use chrono::Utc;
use tokio::{sync::watch, task::JoinHandle};
use validator::Validate;

use crate::{
    client::GradingApi,
    config::SessionConfig,
    error::{Result, SessionError},
    events::{EventBus, NoticeLevel, SessionEvent},
    models::{
        answer::{AnswerRecord, AnswerValue},
        attempt::Attempt,
        question::Quiz,
        submission::SubmitReason,
    },
    session::{
        clock::{ClockEvent, ClockStopper, SessionClock},
        gate::{GateOutcome, SubmissionGate},
        ledger::AnswerLedger,
        reconciler::{ReconcileState, ResultReconciler},
    },
};

/// Where the attempt is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Submitting,
    Submitted,
    SubmitFailed,
    Abandoned,
}

/// Progress summary for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub answered: usize,
    pub total: usize,
    pub remaining_seconds: u64,
}

struct Shared {
    attempt: Attempt,
    ledger: Mutex<AnswerLedger>,
    gate: SubmissionGate,
    api: Arc<dyn GradingApi>,
    events: EventBus,
    config: SessionConfig,
    phase: Mutex<Phase>,
    clock: ClockStopper,
    remaining: Arc<AtomicU64>,
    reconciler: Mutex<Option<ResultReconciler>>,
}

/// Runs one attempt from start to graded result.
///
/// Owns the attempt and its ledger exclusively. Both submit paths (the
/// clock's expiry and `submit`) go through one `SubmissionGate`. Dropping the
/// controller stops the clock and disposes the reconciler.
pub struct SessionController {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    /// Starts an attempt of `quiz`: snapshots its questions, seeds the
    /// ledger and starts the countdown. Must be called inside a tokio runtime.
    pub fn start(
        quiz: &Quiz,
        api: Arc<dyn GradingApi>,
        events: EventBus,
        config: SessionConfig,
    ) -> Result<Self> {
        quiz.validate()
            .map_err(|e| SessionError::InvalidQuiz(e.to_string()))?;

        let attempt = Attempt::from_quiz(quiz, Utc::now());
        let mut ledger = AnswerLedger::new();
        ledger.initialize(attempt.questions())?;

        let clock = SessionClock::start(attempt.time_limit_seconds())?;

        let shared = Arc::new(Shared {
            gate: SubmissionGate::new(Arc::clone(&api), config.max_submit_retries),
            ledger: Mutex::new(ledger),
            api,
            events,
            config,
            phase: Mutex::new(Phase::Running),
            clock: clock.stopper(),
            remaining: clock.remaining_handle(),
            reconciler: Mutex::new(None),
            attempt,
        });

        tracing::info!(
            "Attempt of quiz {} started: {} questions, {}s",
            shared.attempt.quiz_id(),
            shared.attempt.questions().len(),
            shared.attempt.time_limit_seconds()
        );
        shared.events.emit(SessionEvent::AttemptStarted {
            quiz_id: shared.attempt.quiz_id().to_string(),
            question_count: shared.attempt.questions().len(),
            time_limit_seconds: shared.attempt.time_limit_seconds(),
        });

        let driver = tokio::spawn(drive_clock(Arc::clone(&shared), clock));

        Ok(Self {
            shared,
            driver: Mutex::new(Some(driver)),
        })
    }

    pub fn attempt(&self) -> &Attempt {
        &self.shared.attempt
    }

    pub fn phase(&self) -> Phase {
        *self.shared.lock_phase()
    }

    pub fn set_answer(&self, question_id: &str, value: AnswerValue) -> Result<()> {
        let phase = self.shared.lock_phase();
        if *phase != Phase::Running {
            return Err(SessionError::AttemptClosed);
        }

        let (answered, total) = {
            let mut ledger = self.shared.lock_ledger();
            ledger.set_answer(question_id, value)?;
            (ledger.answered_count(), ledger.len())
        };
        self.shared.events.emit(SessionEvent::AnswerChanged {
            question_id: question_id.to_string(),
            answered,
            total,
        });
        drop(phase);
        Ok(())
    }

    pub fn clear_answer(&self, question_id: &str) -> Result<()> {
        let blank = match self.shared.attempt.question(question_id) {
            Some(question) => AnswerValue::unanswered_for(question),
            None => return Err(SessionError::UnknownQuestion(question_id.to_string())),
        };
        self.set_answer(question_id, blank)
    }

    pub fn answer(&self, question_id: &str) -> Option<AnswerRecord> {
        self.shared.lock_ledger().get(question_id).cloned()
    }

    pub fn is_answered(&self, question_id: &str) -> Result<bool> {
        self.shared.lock_ledger().is_answered(question_id)
    }

    pub fn progress(&self) -> Progress {
        let ledger = self.shared.lock_ledger();
        Progress {
            answered: ledger.answered_count(),
            total: ledger.len(),
            remaining_seconds: self.shared.remaining.load(Ordering::SeqCst),
        }
    }

    /// Manual submit. Returns the attempt's single submission outcome.
    pub async fn submit(&self) -> Result<GateOutcome> {
        self.shared.submit(SubmitReason::Manual).await
    }

    /// Explicit re-send after a failed submission.
    pub async fn retry_submission(&self) -> Result<GateOutcome> {
        let flipped = {
            let mut phase = self.shared.lock_phase();
            match *phase {
                Phase::Abandoned => return Err(SessionError::AttemptClosed),
                Phase::SubmitFailed => {
                    *phase = Phase::Submitting;
                    true
                }
                _ => false,
            }
        };

        match self.shared.gate.retry().await {
            Ok(outcome) => {
                self.shared.settle(&outcome);
                Ok(outcome)
            }
            Err(err) => {
                if flipped {
                    let mut phase = self.shared.lock_phase();
                    if *phase == Phase::Submitting {
                        *phase = Phase::SubmitFailed;
                    }
                }
                Err(err)
            }
        }
    }

    pub fn submission_outcome(&self) -> Option<GateOutcome> {
        self.shared.gate.outcome()
    }

    pub fn retries_remaining(&self) -> u32 {
        self.shared.gate.retries_remaining()
    }

    /// Current grading state, once a submission has been accepted.
    pub fn result_state(&self) -> Option<ReconcileState> {
        self.shared.lock_reconciler().as_ref().map(|r| r.state())
    }

    pub fn subscribe_result(&self) -> Option<watch::Receiver<ReconcileState>> {
        self.shared.lock_reconciler().as_ref().map(|r| r.subscribe())
    }

    /// Manual "check status". Returns false when there is nothing to refresh.
    pub fn refresh_result(&self) -> bool {
        match self.shared.lock_reconciler().as_ref() {
            Some(reconciler) => {
                reconciler.refresh();
                true
            }
            None => false,
        }
    }

    /// Waits for the next terminal grading state. `None` if nothing was
    /// submitted or the attempt was torn down meanwhile.
    pub async fn wait_for_result(&self) -> Option<ReconcileState> {
        let mut rx = self.subscribe_result()?;
        let state = rx.wait_for(|s| s.is_terminal()).await.ok()?.clone();
        Some(state)
    }

    /// Navigation away: stops everything without submitting.
    pub fn abandon(&self) {
        let changed = {
            let mut phase = self.shared.lock_phase();
            let changed = *phase != Phase::Abandoned;
            *phase = Phase::Abandoned;
            changed
        };
        self.teardown();
        if changed {
            tracing::info!("Attempt of quiz {} abandoned", self.shared.attempt.quiz_id());
            self.shared.events.emit(SessionEvent::AttemptAbandoned);
        }
    }

    fn teardown(&self) {
        self.shared.clock.stop();
        if let Some(driver) = self
            .driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            driver.abort();
        }
        if let Some(reconciler) = self.shared.lock_reconciler().take() {
            reconciler.dispose();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Shared {
    async fn submit(&self, reason: SubmitReason) -> Result<GateOutcome> {
        {
            let mut phase = self.lock_phase();
            match *phase {
                Phase::Abandoned => return Err(SessionError::AttemptClosed),
                Phase::Running => {
                    *phase = Phase::Submitting;
                    self.clock.stop();
                    self.events.emit(SessionEvent::SubmissionStarted { reason });
                }
                _ => {}
            }
        }

        let outcome = self
            .gate
            .trigger(reason, || {
                let answers = self.lock_ledger().snapshot();
                self.attempt.build_request(answers, Utc::now())
            })
            .await;

        self.settle(&outcome);
        Ok(outcome)
    }

    /// Applies a settled gate outcome once; later calls with the same outcome
    /// find the phase already moved on.
    fn settle(&self, outcome: &GateOutcome) {
        let mut phase = self.lock_phase();
        if *phase != Phase::Submitting {
            return;
        }

        match outcome {
            GateOutcome::Submitted {
                submission_id,
                reason,
            } => {
                *phase = Phase::Submitted;
                self.events.emit(SessionEvent::Submitted {
                    submission_id: submission_id.clone(),
                    reason: *reason,
                });
                self.events.notify(NoticeLevel::Success, "Quiz submitted");

                let mut slot = self.lock_reconciler();
                if slot.is_none() {
                    *slot = Some(ResultReconciler::start(
                        Arc::clone(&self.api),
                        submission_id.clone(),
                        self.config.poll,
                        self.events.clone(),
                    ));
                }
            }
            GateOutcome::Failed { reason, error } => {
                *phase = Phase::SubmitFailed;
                self.events.emit(SessionEvent::SubmissionFailed {
                    reason: *reason,
                    error: error.to_string(),
                });
                self.events.notify(
                    NoticeLevel::Error,
                    "Submission failed. Use retry to send your answers again.",
                );
            }
        }
    }

    /// Emits a tick unless the submit path already stopped the clock.
    fn emit_tick(&self, remaining: u64) -> bool {
        let phase = self.lock_phase();
        if *phase != Phase::Running {
            return false;
        }
        tracing::debug!("{}s remaining", remaining);
        self.events.emit(SessionEvent::Tick {
            remaining_seconds: remaining,
        });
        true
    }

    fn announce_expiry(&self) -> bool {
        let phase = self.lock_phase();
        if *phase != Phase::Running {
            return false;
        }
        self.events.emit(SessionEvent::TimeExpired);
        self.events
            .notify(NoticeLevel::Warning, "Time is up. Submitting your answers.");
        true
    }

    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_ledger(&self) -> MutexGuard<'_, AnswerLedger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_reconciler(&self) -> MutexGuard<'_, Option<ResultReconciler>> {
        self.reconciler.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn drive_clock(shared: Arc<Shared>, mut clock: SessionClock) {
    while let Some(event) = clock.next_event().await {
        match event {
            ClockEvent::Tick { remaining } => {
                if !shared.emit_tick(remaining) {
                    return;
                }
            }
            ClockEvent::Expired => {
                if !shared.announce_expiry() {
                    return;
                }
                tracing::info!("Time budget exhausted; submitting");
                if let Err(err) = shared.submit(SubmitReason::Expired).await {
                    tracing::warn!("Expiry submit skipped: {}", err);
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PollConfig,
        error::ApiError,
        events::EventReceiver,
        mock::ScriptedGradingApi,
        models::{
            question::{Question, QuestionKind},
            submission::GradingStatus,
        },
    };
    use std::time::Duration;

    fn quiz(time_limit_seconds: i64) -> Quiz {
        Quiz {
            id: "quiz-7".to_string(),
            title: "Mixed".to_string(),
            time_limit_seconds,
            questions: vec![
                Question {
                    id: "mc".to_string(),
                    content: "2 + 2 = ?".to_string(),
                    points: 5,
                    kind: QuestionKind::MultipleChoice {
                        options: vec!["3".to_string(), "4".to_string()],
                        correct_option: Some(1),
                    },
                },
                Question {
                    id: "code".to_string(),
                    content: "Return 42".to_string(),
                    points: 10,
                    kind: QuestionKind::Code {
                        language: "rust".to_string(),
                        test_cases: vec![],
                    },
                },
            ],
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            poll: PollConfig {
                interval: Duration::from_secs(5),
                max_polls: 60,
            },
            max_submit_retries: 2,
        }
    }

    fn drain(receiver: &mut EventReceiver) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    async fn wait_for_tick(receiver: &mut EventReceiver, remaining: u64) {
        loop {
            if let SessionEvent::Tick { remaining_seconds } = receiver.recv().await.unwrap() {
                if remaining_seconds == remaining {
                    return;
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_submit_at_tick_three() {
        let bus = EventBus::new(256);
        let mut receiver = bus.register();
        let api = Arc::new(ScriptedGradingApi::new().with_statuses(&[GradingStatus::Completed]));
        let session = SessionController::start(&quiz(5), api.clone(), bus, config()).unwrap();

        session.set_answer("mc", AnswerValue::choice(1)).unwrap();
        session
            .set_answer("code", AnswerValue::code("fn answer() -> i32 { 42 }"))
            .unwrap();
        assert_eq!(session.progress().answered, 2);

        wait_for_tick(&mut receiver, 2).await;
        let outcome = session.submit().await.unwrap();
        assert_eq!(outcome.reason(), SubmitReason::Manual);

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(api.submit_count(), 1);
        let sent = &api.submissions()[0];
        assert_eq!(sent.quiz_id, "quiz-7");
        assert!(sent.answers.iter().all(|a| a.is_answered()));
        assert_eq!(sent.answers.len(), 2);

        let after: Vec<SessionEvent> = drain(&mut receiver);
        assert!(
            !after
                .iter()
                .any(|e| matches!(e, SessionEvent::Tick { .. } | SessionEvent::TimeExpired)),
            "clock kept running: {:?}",
            after
        );
        assert_eq!(session.progress().remaining_seconds, 2);
        assert_eq!(session.phase(), Phase::Submitted);
        assert!(matches!(
            session.wait_for_result().await,
            Some(ReconcileState::Completed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_submits_unanswered_sentinels() {
        let bus = EventBus::new(256);
        let mut receiver = bus.register();
        let api = Arc::new(ScriptedGradingApi::new().with_statuses(&[GradingStatus::Completed]));
        let session = SessionController::start(&quiz(5), api.clone(), bus, config()).unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(api.submit_count(), 1);
        let sent = &api.submissions()[0];
        assert_eq!(
            sent.answers[0].value,
            AnswerValue::Choice {
                selected_option: None
            }
        );
        assert_eq!(sent.answers[1].value, AnswerValue::code(""));

        let events = drain(&mut receiver);
        let expired = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::TimeExpired))
            .count();
        let ticks = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Tick { .. }))
            .count();
        assert_eq!(expired, 1);
        assert_eq!(ticks, 5);
        assert_eq!(
            session.submission_outcome().map(|o| o.reason()),
            Some(SubmitReason::Expired)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_submit_during_expiry_flight_submits_once() {
        let api = Arc::new(ScriptedGradingApi::new().with_latency(Duration::from_secs(2)));
        let session =
            SessionController::start(&quiz(1), api.clone(), EventBus::new(64), config()).unwrap();

        // Expiry fires at 1s and its POST is in flight until 3s.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(session.phase(), Phase::Submitting);

        let outcome = session.submit().await.unwrap();
        assert_eq!(outcome.reason(), SubmitReason::Expired);
        assert_eq!(api.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_rejected_after_submit() {
        let api = Arc::new(ScriptedGradingApi::new());
        let session =
            SessionController::start(&quiz(60), api.clone(), EventBus::new(64), config()).unwrap();

        session.submit().await.unwrap();
        assert_eq!(
            session.set_answer("mc", AnswerValue::choice(0)),
            Err(SessionError::AttemptClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_submission_needs_explicit_retry() {
        let bus = EventBus::new(64);
        let mut receiver = bus.register();
        let api = Arc::new(
            ScriptedGradingApi::new()
                .with_submit(Err(ApiError::Transport("offline".to_string())))
                .with_statuses(&[GradingStatus::Completed]),
        );
        let session = SessionController::start(&quiz(60), api.clone(), bus, config()).unwrap();
        session.set_answer("mc", AnswerValue::choice(0)).unwrap();

        let failed = session.submit().await.unwrap();
        assert!(matches!(failed, GateOutcome::Failed { .. }));
        assert_eq!(session.phase(), Phase::SubmitFailed);
        assert!(session.result_state().is_none());

        // Nothing resends on its own.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(api.submit_count(), 1);
        assert!(
            drain(&mut receiver)
                .iter()
                .any(|e| matches!(e, SessionEvent::SubmissionFailed { .. }))
        );

        let retried = session.retry_submission().await.unwrap();
        assert_eq!(retried.submission_id(), Some("sub-2"));
        assert_eq!(session.phase(), Phase::Submitted);
        assert_eq!(session.retries_remaining(), 1);

        let submissions = api.submissions();
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0], submissions[1]);

        assert!(matches!(
            session.wait_for_result().await,
            Some(ReconcileState::Completed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_stops_clock_without_submitting() {
        let bus = EventBus::new(64);
        let mut receiver = bus.register();
        let api = Arc::new(ScriptedGradingApi::new());
        let session = SessionController::start(&quiz(3), api.clone(), bus, config()).unwrap();

        session.abandon();
        session.abandon();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(api.submit_count(), 0);
        assert_eq!(session.phase(), Phase::Abandoned);
        assert_eq!(session.submit().await, Err(SessionError::AttemptClosed));
        assert!(!session.refresh_result());

        let events = drain(&mut receiver);
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Tick { .. })));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SessionEvent::AttemptAbandoned))
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_disposes_reconciler() {
        let api = Arc::new(ScriptedGradingApi::new().with_statuses(&[GradingStatus::Processing]));
        let session =
            SessionController::start(&quiz(60), api.clone(), EventBus::new(64), config()).unwrap();
        session.submit().await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let fetched = api.fetch_count();
        assert_eq!(fetched, 2);

        drop(session);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.fetch_count(), fetched);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_budget_rejected() {
        let api = Arc::new(ScriptedGradingApi::new());
        let result = SessionController::start(&quiz(0), api, EventBus::new(8), config());
        assert!(matches!(result, Err(SessionError::InvalidBudget(0))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_quiz_rejected() {
        let api = Arc::new(ScriptedGradingApi::new());
        let mut broken = quiz(60);
        broken.questions[1].id = "mc".to_string();
        let result = SessionController::start(&broken, api, EventBus::new(8), config());
        assert!(matches!(result, Err(SessionError::InvalidQuiz(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_errors_surface_through_controller() {
        let api = Arc::new(ScriptedGradingApi::new());
        let session =
            SessionController::start(&quiz(60), api, EventBus::new(8), config()).unwrap();

        assert_eq!(
            session.set_answer("ghost", AnswerValue::choice(0)),
            Err(SessionError::UnknownQuestion("ghost".to_string()))
        );
        assert_eq!(
            session.set_answer("code", AnswerValue::choice(0)),
            Err(SessionError::AnswerKindMismatch("code".to_string()))
        );

        session.set_answer("mc", AnswerValue::choice(0)).unwrap();
        assert!(session.is_answered("mc").unwrap());
        session.clear_answer("mc").unwrap();
        assert!(!session.is_answered("mc").unwrap());
        assert_eq!(session.progress().answered, 0);
        assert_eq!(session.progress().total, 2);
    }
}
