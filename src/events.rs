//! In-process event bus for session progress and user-facing notices
//!
//! Components that need to tell the user something (a tick, a failed
//! submission, a finished grading job) receive an `EventBus` handle at
//! construction and emit into it. Views `register()` for a receiver. The
//! owner of the bus calls `dispose()` when the session is torn down; after
//! that emits are dropped and every receiver observes a closed channel.
//!
//! The bus uses `tokio::sync::broadcast`: emitting never blocks, and events
//! emitted while nobody is registered are dropped.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{models::submission::SubmitReason, session::reconciler::ReconcileState};

pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Recommended per-listener buffer.
pub const DEFAULT_CAPACITY: usize = 128;

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<Mutex<Option<broadcast::Sender<SessionEvent>>>>,
}

impl EventBus {
    /// Create a new event bus buffering up to `capacity` events per listener.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    /// Register a listener for all events emitted from now on.
    ///
    /// On a disposed bus the returned receiver is already closed.
    pub fn register(&self) -> EventReceiver {
        match self.lock().as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(1);
                drop(sender);
                receiver
            }
        }
    }

    /// Emit an event to all listeners. Never blocks; no-op once disposed.
    pub fn emit(&self, event: SessionEvent) {
        if let Some(sender) = self.lock().as_ref() {
            // Err only means nobody is listening.
            let _ = sender.send(event);
        }
    }

    /// Shorthand for a user-facing `Notice`.
    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(SessionEvent::Notice {
            level,
            message: message.into(),
        });
    }

    /// Close the bus. Idempotent.
    pub fn dispose(&self) {
        self.lock().take();
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().is_none()
    }

    /// Number of registered listeners. Diagnostics only.
    pub fn listener_count(&self) -> usize {
        self.lock()
            .as_ref()
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<broadcast::Sender<SessionEvent>>> {
        // A poisoned lock still holds a valid Option.
        self.sender.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Events emitted during one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    AttemptStarted {
        quiz_id: String,
        question_count: usize,
        time_limit_seconds: i64,
    },

    /// One clock tick; `remaining_seconds` is the value after the decrement.
    Tick { remaining_seconds: u64 },

    TimeExpired,

    AnswerChanged {
        question_id: String,
        answered: usize,
        total: usize,
    },

    SubmissionStarted { reason: SubmitReason },

    Submitted {
        submission_id: String,
        reason: SubmitReason,
    },

    SubmissionFailed { reason: SubmitReason, error: String },

    GradingUpdated { state: ReconcileState },

    /// Replacement for toast popups.
    Notice { level: NoticeLevel, message: String },

    AttemptAbandoned,
}
