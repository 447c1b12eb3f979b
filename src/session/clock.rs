// src/session/clock.rs

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::time::Duration;

use tokio::{
    sync::mpsc,
    task::{AbortHandle, JoinHandle},
    time::{Instant, MissedTickBehavior, interval_at},
};

use crate::{
    config::TICK_INTERVAL,
    error::{Result, SessionError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// Remaining seconds after this tick's decrement.
    Tick { remaining: u64 },
    /// Sent once, right after the tick that reaches zero.
    Expired,
}

/// Countdown over a time budget.
///
/// A background task ticks once per period and forwards events over a
/// channel; `next_event` yields them. Stopping (explicitly, through a
/// `ClockStopper`, or by dropping the clock) aborts the task, and any event
/// already queued is discarded, so nothing is observed after `stop()`.
///
/// Ticks missed while the runtime was suspended are delivered in a burst,
/// each decrementing by one, so expiry still fires exactly once.
pub struct SessionClock {
    events: mpsc::UnboundedReceiver<ClockEvent>,
    stopper: ClockStopper,
    remaining: Arc<AtomicU64>,
    budget: u64,
}

/// Cloneable handle that stops a `SessionClock` from anywhere.
#[derive(Clone, Debug)]
pub struct ClockStopper {
    stopped: Arc<AtomicBool>,
    task: AbortHandle,
}

impl ClockStopper {
    /// Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("Session clock stopped");
        }
        self.task.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl SessionClock {
    /// Starts a countdown of `budget_seconds` one-second ticks.
    pub fn start(budget_seconds: i64) -> Result<Self> {
        Self::start_with_period(budget_seconds, TICK_INTERVAL)
    }

    pub fn start_with_period(budget_seconds: i64, period: Duration) -> Result<Self> {
        if budget_seconds <= 0 {
            return Err(SessionError::InvalidBudget(budget_seconds));
        }
        let budget = budget_seconds as u64;

        let (tx, rx) = mpsc::unbounded_channel();
        let remaining = Arc::new(AtomicU64::new(budget));
        let stopped = Arc::new(AtomicBool::new(false));

        let task: JoinHandle<()> = tokio::spawn(run_countdown(
            budget,
            period,
            tx,
            Arc::clone(&remaining),
            Arc::clone(&stopped),
        ));

        tracing::debug!("Session clock started with {}s budget", budget);

        Ok(Self {
            events: rx,
            stopper: ClockStopper {
                stopped,
                task: task.abort_handle(),
            },
            remaining,
            budget,
        })
    }

    /// Next tick or expiry. `None` once stopped or after `Expired`.
    pub async fn next_event(&mut self) -> Option<ClockEvent> {
        if self.stopper.is_stopped() {
            return None;
        }
        let event = self.events.recv().await?;
        if self.stopper.is_stopped() {
            return None;
        }
        Some(event)
    }

    pub fn stop(&self) {
        self.stopper.stop();
    }

    pub fn stopper(&self) -> ClockStopper {
        self.stopper.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopper.is_stopped()
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Shared view of the remaining seconds, readable after the clock moved
    /// into another task.
    pub fn remaining_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.remaining)
    }
}

impl Drop for SessionClock {
    fn drop(&mut self) {
        self.stopper.stop();
    }
}

async fn run_countdown(
    budget: u64,
    period: Duration,
    tx: mpsc::UnboundedSender<ClockEvent>,
    remaining: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let mut left = budget;
    while left > 0 {
        ticker.tick().await;
        if stopped.load(Ordering::SeqCst) {
            return;
        }
        left -= 1;
        remaining.store(left, Ordering::SeqCst);
        if tx.send(ClockEvent::Tick { remaining: left }).is_err() {
            return;
        }
    }

    tracing::info!("Session clock expired after {}s", budget);
    let _ = tx.send(ClockEvent::Expired);
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(clock: &mut SessionClock) -> Vec<ClockEvent> {
        let mut events = Vec::new();
        while let Some(event) = clock.next_event().await {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_positive_budget_rejected() {
        assert_eq!(
            SessionClock::start(0).err(),
            Some(SessionError::InvalidBudget(0))
        );
        assert_eq!(
            SessionClock::start(-5).err(),
            Some(SessionError::InvalidBudget(-5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_down_then_expires_once() {
        let started = Instant::now();
        let mut clock = SessionClock::start(3).unwrap();

        let events = drain(&mut clock).await;

        assert_eq!(
            events,
            vec![
                ClockEvent::Tick { remaining: 2 },
                ClockEvent::Tick { remaining: 1 },
                ClockEvent::Tick { remaining: 0 },
                ClockEvent::Expired,
            ]
        );
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(clock.remaining(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(clock.next_event().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_budget_expires_exactly_once() {
        for budget in 1..=12 {
            let mut clock = SessionClock::start(budget).unwrap();
            let events = drain(&mut clock).await;

            let expired = events
                .iter()
                .filter(|e| matches!(e, ClockEvent::Expired))
                .count();
            let ticks = events.len() - expired;

            assert_eq!(expired, 1, "budget {}", budget);
            assert_eq!(ticks as i64, budget, "budget {}", budget);
            assert_eq!(events.last(), Some(&ClockEvent::Expired));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let mut clock = SessionClock::start(10).unwrap();
        assert_eq!(
            clock.next_event().await,
            Some(ClockEvent::Tick { remaining: 9 })
        );
        assert_eq!(
            clock.next_event().await,
            Some(ClockEvent::Tick { remaining: 8 })
        );

        clock.stop();
        clock.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(clock.is_stopped());
        assert_eq!(clock.next_event().await, None);
        assert_eq!(clock.remaining(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_events_discarded_after_external_stop() {
        let mut clock = SessionClock::start(5).unwrap();
        let stopper = clock.stopper();

        // Let two ticks queue up without reading them.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        stopper.stop();

        assert_eq!(clock.next_event().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_clock() {
        let clock = SessionClock::start(5).unwrap();
        let stopper = clock.stopper();
        drop(clock);
        assert!(stopper.is_stopped());
    }
}
