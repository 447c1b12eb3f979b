// src/session/gate.rs

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::{
    client::GradingApi,
    error::{ApiError, Result, SessionError},
    models::submission::{SubmissionRequest, SubmitReason},
};

/// Settled result of the attempt's submission.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Submitted {
        submission_id: String,
        reason: SubmitReason,
    },
    Failed {
        reason: SubmitReason,
        error: ApiError,
    },
}

impl GateOutcome {
    pub fn reason(&self) -> SubmitReason {
        match self {
            GateOutcome::Submitted { reason, .. } | GateOutcome::Failed { reason, .. } => *reason,
        }
    }

    pub fn submission_id(&self) -> Option<&str> {
        match self {
            GateOutcome::Submitted { submission_id, .. } => Some(submission_id),
            GateOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug)]
enum GateState {
    Open,
    InFlight,
    Settled(GateOutcome),
}

#[derive(Debug)]
struct Inner {
    state: GateState,
    request: Option<Arc<SubmissionRequest>>,
    retries_used: u32,
}

/// What a caller does after inspecting the state under the lock.
enum Step {
    Send(Arc<SubmissionRequest>, SubmitReason),
    Wait,
    Done(GateOutcome),
}

/// At-most-one submission per attempt.
///
/// The first `trigger` of either reason locks the gate synchronously, before
/// the network call, and every later trigger waits for and returns that
/// outcome. A failure leaves the gate locked; only `retry` sends again, and
/// it re-sends the frozen request instead of building a new one.
pub struct SubmissionGate {
    api: Arc<dyn GradingApi>,
    inner: Mutex<Inner>,
    settled: watch::Sender<Option<GateOutcome>>,
    max_retries: u32,
}

impl SubmissionGate {
    pub fn new(api: Arc<dyn GradingApi>, max_retries: u32) -> Self {
        let (settled, _) = watch::channel(None);
        Self {
            api,
            inner: Mutex::new(Inner {
                state: GateState::Open,
                request: None,
                retries_used: 0,
            }),
            settled,
            max_retries,
        }
    }

    /// Fires the gate. `build` runs only for the winning call.
    pub async fn trigger<F>(&self, reason: SubmitReason, build: F) -> GateOutcome
    where
        F: FnOnce() -> SubmissionRequest,
    {
        let step = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            match &inner.state {
                GateState::Open => {
                    let request = Arc::new(build());
                    inner.state = GateState::InFlight;
                    inner.request = Some(Arc::clone(&request));
                    Step::Send(request, reason)
                }
                GateState::InFlight => Step::Wait,
                GateState::Settled(outcome) => Step::Done(outcome.clone()),
            }
        };

        match step {
            Step::Send(request, reason) => self.send(request, reason).await,
            Step::Wait => {
                tracing::debug!("Submission already in flight; {:?} trigger suppressed", reason);
                self.wait_settled().await
            }
            Step::Done(outcome) => {
                tracing::debug!("Submission already settled; {:?} trigger ignored", reason);
                outcome
            }
        }
    }

    /// Deliberate re-send after a failed submission.
    pub async fn retry(&self) -> Result<GateOutcome> {
        let step = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            match &inner.state {
                GateState::Open => {
                    return Err(SessionError::RetryUnavailable(
                        "nothing has been submitted".to_string(),
                    ));
                }
                GateState::InFlight => Step::Wait,
                GateState::Settled(outcome @ GateOutcome::Submitted { .. }) => {
                    Step::Done(outcome.clone())
                }
                GateState::Settled(GateOutcome::Failed { reason, .. }) => {
                    let reason = *reason;
                    if inner.retries_used >= self.max_retries {
                        return Err(SessionError::RetryUnavailable(format!(
                            "retry limit of {} reached",
                            self.max_retries
                        )));
                    }
                    let Some(request) = inner.request.clone() else {
                        return Err(SessionError::RetryUnavailable(
                            "no request recorded".to_string(),
                        ));
                    };
                    inner.retries_used += 1;
                    inner.state = GateState::InFlight;
                    self.settled.send_replace(None);
                    Step::Send(request, reason)
                }
            }
        };

        Ok(match step {
            Step::Send(request, reason) => {
                tracing::info!("Retrying submission ({:?})", reason);
                self.send(request, reason).await
            }
            Step::Wait => self.wait_settled().await,
            Step::Done(outcome) => outcome,
        })
    }

    /// Settled outcome, `None` while open or in flight.
    pub fn outcome(&self) -> Option<GateOutcome> {
        match &self.lock().state {
            GateState::Settled(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// True from the first trigger on.
    pub fn is_locked(&self) -> bool {
        !matches!(self.lock().state, GateState::Open)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.lock().state, GateState::InFlight)
    }

    pub fn retries_remaining(&self) -> u32 {
        self.max_retries.saturating_sub(self.lock().retries_used)
    }

    /// The frozen request, once built.
    pub fn request(&self) -> Option<Arc<SubmissionRequest>> {
        self.lock().request.clone()
    }

    async fn send(&self, request: Arc<SubmissionRequest>, reason: SubmitReason) -> GateOutcome {
        let mut guard = InFlightGuard {
            gate: self,
            reason,
            armed: true,
        };

        tracing::info!(
            "Submitting quiz {} ({} answers, {:?})",
            request.quiz_id,
            request.answers.len(),
            reason
        );

        let outcome = match self.api.submit(&request).await {
            Ok(receipt) => {
                tracing::info!("Submission accepted: {}", receipt.id);
                GateOutcome::Submitted {
                    submission_id: receipt.id,
                    reason,
                }
            }
            Err(error) => {
                tracing::error!("Submission failed: {}", error);
                GateOutcome::Failed { reason, error }
            }
        };

        guard.armed = false;
        self.settle(outcome.clone());
        outcome
    }

    fn settle(&self, outcome: GateOutcome) {
        self.lock().state = GateState::Settled(outcome.clone());
        self.settled.send_replace(Some(outcome));
    }

    async fn wait_settled(&self) -> GateOutcome {
        let mut rx = self.settled.subscribe();
        if let Ok(value) = rx.wait_for(Option::is_some).await {
            if let Some(outcome) = value.as_ref() {
                return outcome.clone();
            }
        }
        // The sender lives in `self`, so the channel cannot close here.
        GateOutcome::Failed {
            reason: SubmitReason::Manual,
            error: ApiError::Transport("submission gate closed".to_string()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Settles the gate as failed if the in-flight future is dropped before the
/// call returns, so waiters are released and the lock stays held.
struct InFlightGuard<'a> {
    gate: &'a SubmissionGate,
    reason: SubmitReason,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Submission call cancelled before completion");
            self.gate.settle(GateOutcome::Failed {
                reason: self.reason,
                error: ApiError::Transport("submission cancelled".to_string()),
            });
        }
    }
}
