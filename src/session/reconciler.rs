// src/session/reconciler.rs

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    client::GradingApi,
    config::PollConfig,
    error::ApiError,
    events::{EventBus, NoticeLevel, SessionEvent},
    models::submission::{GradingResult, GradingStatus},
};

/// Result-view state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReconcileState {
    Loading,
    Processing,
    Submitted,
    Completed { result: GradingResult },
    Error { result: GradingResult },
    NotFound,
    /// Poll budget exhausted while still grading. Recoverable by refresh.
    TimedOut,
}

impl ReconcileState {
    /// Still waiting on the grader: polling continues from here.
    pub fn awaits_result(&self) -> bool {
        matches!(
            self,
            ReconcileState::Loading | ReconcileState::Processing | ReconcileState::Submitted
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.awaits_result()
    }

    pub fn result(&self) -> Option<&GradingResult> {
        match self {
            ReconcileState::Completed { result } | ReconcileState::Error { result } => Some(result),
            _ => None,
        }
    }

    /// What the view layer shows for this state.
    pub fn view(&self) -> ResultView<'_> {
        match self {
            ReconcileState::Loading => ResultView::Progress {
                message: "Loading results...",
            },
            ReconcileState::Processing | ReconcileState::Submitted => ResultView::Progress {
                message: "Your answers are being graded...",
            },
            ReconcileState::Completed { result } => ResultView::Report(result),
            ReconcileState::Error { result } => ResultView::RetryPrompt {
                message: match &result.message {
                    Some(detail) => format!(
                        "Grading failed: {}. Please contact your instructor.",
                        detail
                    ),
                    None => "Grading failed. Please contact your instructor.".to_string(),
                },
            },
            ReconcileState::TimedOut => ResultView::RetryPrompt {
                message: "Grading is taking longer than expected. Refresh to keep checking."
                    .to_string(),
            },
            ReconcileState::NotFound => ResultView::Missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultView<'a> {
    Progress { message: &'static str },
    Report(&'a GradingResult),
    RetryPrompt { message: String },
    Missing,
}

/// Inputs of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// User-visible fetch (initial load, manual refresh): shows `Loading`.
    RefreshVisible,
    /// Scheduled poll: nothing changes until the response arrives.
    RefreshTransparent,
    Fetched(GradingResult),
    /// Resource missing or not visible to the caller.
    Missing,
    /// Network-level miss; the next poll proceeds.
    TransportFailed,
    BudgetExhausted,
}

/// The complete transition table.
pub fn transition(state: &ReconcileState, event: Transition) -> ReconcileState {
    match event {
        Transition::RefreshVisible => match state {
            ReconcileState::Completed { .. } => state.clone(),
            _ => ReconcileState::Loading,
        },
        Transition::RefreshTransparent | Transition::TransportFailed => state.clone(),
        Transition::Fetched(result) => match result.status {
            GradingStatus::Processing => ReconcileState::Processing,
            GradingStatus::Submitted => ReconcileState::Submitted,
            GradingStatus::Completed => ReconcileState::Completed { result },
            GradingStatus::Error => ReconcileState::Error { result },
        },
        Transition::Missing => ReconcileState::NotFound,
        Transition::BudgetExhausted => {
            if state.awaits_result() {
                ReconcileState::TimedOut
            } else {
                state.clone()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshMode {
    Visible,
    Transparent,
}

/// Owned handle to the poll task. Dropping it removes the schedule.
struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Inner {
    state: ReconcileState,
    polls_used: u32,
    /// Bumped on dispose and on every restart; callbacks from an older
    /// generation are ignored.
    generation: u64,
    disposed: bool,
}

struct Shared {
    api: Arc<dyn GradingApi>,
    submission_id: String,
    config: PollConfig,
    events: EventBus,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ReconcileState>,
}

enum Next {
    Continue,
    Stop,
}

/// Follows a submitted attempt's grading job to a terminal state.
///
/// Fetches once on creation, then every `config.interval` after the previous
/// fetch returned while the job is still grading. Every fetch counts against
/// `config.max_polls`. Must be created inside a tokio runtime.
pub struct ResultReconciler {
    shared: Arc<Shared>,
    poller: Mutex<Option<PollHandle>>,
}

impl ResultReconciler {
    pub fn start(
        api: Arc<dyn GradingApi>,
        submission_id: impl Into<String>,
        config: PollConfig,
        events: EventBus,
    ) -> Self {
        let (state_tx, _) = watch::channel(ReconcileState::Loading);
        let shared = Arc::new(Shared {
            api,
            submission_id: submission_id.into(),
            config,
            events,
            inner: Mutex::new(Inner {
                state: ReconcileState::Loading,
                polls_used: 0,
                generation: 0,
                disposed: false,
            }),
            state_tx,
        });

        tracing::info!("Following grading result {}", shared.submission_id);
        let handle = spawn_poller(Arc::clone(&shared), 0, RefreshMode::Visible);

        Self {
            shared,
            poller: Mutex::new(Some(handle)),
        }
    }

    pub fn submission_id(&self) -> &str {
        &self.shared.submission_id
    }

    pub fn state(&self) -> ReconcileState {
        self.shared.lock().state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconcileState> {
        self.shared.state_tx.subscribe()
    }

    pub fn polls_used(&self) -> u32 {
        self.shared.lock().polls_used
    }

    /// Whether a poll task is scheduled or running.
    pub fn is_polling(&self) -> bool {
        self.poller_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Manual "check status".
    ///
    /// While polling this fetches immediately and keeps the used budget. From
    /// `TimedOut`, `Error` or `NotFound` it starts over with a fresh budget.
    /// No-op once `Completed` or disposed.
    pub fn refresh(&self) {
        let generation = {
            let mut guard = self.shared.lock();
            let inner = &mut *guard;
            if inner.disposed {
                return;
            }
            match inner.state {
                ReconcileState::Completed { .. } => return,
                ReconcileState::TimedOut
                | ReconcileState::Error { .. }
                | ReconcileState::NotFound => {
                    tracing::info!("Manual refresh of {}: budget reset", self.shared.submission_id);
                    inner.polls_used = 0;
                }
                _ => {}
            }
            inner.generation += 1;
            inner.generation
        };

        let handle = spawn_poller(Arc::clone(&self.shared), generation, RefreshMode::Visible);
        // Replacing the slot drops, and so aborts, the previous schedule.
        *self.poller_slot() = Some(handle);
    }

    /// Tears down the schedule. Responses still in flight are discarded.
    /// Idempotent.
    pub fn dispose(&self) {
        {
            let mut inner = self.shared.lock();
            if !inner.disposed {
                tracing::debug!("Disposing reconciler for {}", self.shared.submission_id);
            }
            inner.disposed = true;
            inner.generation += 1;
        }
        self.poller_slot().take();
    }

    fn poller_slot(&self) -> MutexGuard<'_, Option<PollHandle>> {
        self.poller.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ResultReconciler {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn spawn_poller(shared: Arc<Shared>, generation: u64, mode: RefreshMode) -> PollHandle {
    PollHandle {
        task: tokio::spawn(poll_loop(shared, generation, mode)),
    }
}

async fn poll_loop(shared: Arc<Shared>, generation: u64, first: RefreshMode) {
    let mut mode = first;
    loop {
        if !shared.begin_fetch(generation, mode) {
            return;
        }

        let outcome = shared.api.fetch_result(&shared.submission_id).await;

        match shared.finish_fetch(generation, outcome) {
            Next::Continue => {}
            Next::Stop => return,
        }

        tokio::time::sleep(shared.config.interval).await;
        mode = RefreshMode::Transparent;
    }
}

impl Shared {
    /// Entry check of every callback. Spends one unit of budget.
    fn begin_fetch(&self, generation: u64, mode: RefreshMode) -> bool {
        let mut inner = self.lock();
        if inner.disposed || inner.generation != generation {
            return false;
        }
        if inner.polls_used >= self.config.max_polls {
            self.apply(&mut inner, Transition::BudgetExhausted);
            return false;
        }

        inner.polls_used += 1;
        tracing::debug!(
            "Fetching result {} ({}/{})",
            self.submission_id,
            inner.polls_used,
            self.config.max_polls
        );

        let event = match mode {
            RefreshMode::Visible => Transition::RefreshVisible,
            RefreshMode::Transparent => Transition::RefreshTransparent,
        };
        self.apply(&mut inner, event);
        true
    }

    fn finish_fetch(&self, generation: u64, outcome: Result<GradingResult, ApiError>) -> Next {
        let mut inner = self.lock();
        if inner.disposed || inner.generation != generation {
            tracing::debug!("Discarding stale response for {}", self.submission_id);
            return Next::Stop;
        }

        let event = match outcome {
            Ok(result) => Transition::Fetched(result),
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    "Transient failure fetching result {}: {}",
                    self.submission_id,
                    err
                );
                Transition::TransportFailed
            }
            Err(err) => {
                tracing::warn!("Result {} unavailable: {}", self.submission_id, err);
                Transition::Missing
            }
        };
        self.apply(&mut inner, event);

        if !inner.state.awaits_result() {
            return Next::Stop;
        }
        if inner.polls_used >= self.config.max_polls {
            tracing::warn!(
                "Result {} still grading after {} fetches",
                self.submission_id,
                inner.polls_used
            );
            self.apply(&mut inner, Transition::BudgetExhausted);
            return Next::Stop;
        }
        Next::Continue
    }

    /// Runs one transition and publishes the new state if it changed.
    fn apply(&self, inner: &mut Inner, event: Transition) {
        let next = transition(&inner.state, event);
        if next == inner.state {
            return;
        }
        inner.state = next.clone();
        self.state_tx.send_replace(next.clone());

        match &next {
            ReconcileState::Completed { .. } => {
                self.events.notify(NoticeLevel::Success, "Grading complete");
            }
            ReconcileState::Error { .. } => {
                self.events.notify(
                    NoticeLevel::Error,
                    "Grading failed. Please contact your instructor.",
                );
            }
            ReconcileState::TimedOut => {
                self.events.notify(
                    NoticeLevel::Warning,
                    "Grading is taking longer than expected",
                );
            }
            _ => {}
        }
        self.events
            .emit(SessionEvent::GradingUpdated { state: next });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
