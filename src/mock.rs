//! Scripted grading backend for tests
//!
//! `ScriptedGradingApi` replays queued responses for `submit` and
//! `fetch_result`, counts calls, and records every submission it receives.
//! When the fetch script runs dry the last fetch response is repeated, so a
//! single `processing` entry simulates a job that never finishes.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::{
    client::GradingApi,
    error::ApiError,
    models::submission::{GradingResult, GradingStatus, SubmissionReceipt, SubmissionRequest},
};

#[derive(Default)]
pub struct ScriptedGradingApi {
    submit_script: Mutex<VecDeque<Result<SubmissionReceipt, ApiError>>>,
    fetch_script: Mutex<VecDeque<Result<GradingResult, ApiError>>>,
    last_fetch: Mutex<Option<Result<GradingResult, ApiError>>>,
    latency: Duration,
    submit_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    submissions: Mutex<Vec<SubmissionRequest>>,
}

impl ScriptedGradingApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every call before it answers.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_submit(self, response: Result<SubmissionReceipt, ApiError>) -> Self {
        lock(&self.submit_script).push_back(response);
        self
    }

    pub fn with_fetch(self, response: Result<GradingResult, ApiError>) -> Self {
        lock(&self.fetch_script).push_back(response);
        self
    }

    /// Queue bare-status fetch responses in order.
    pub fn with_statuses(self, statuses: &[GradingStatus]) -> Self {
        {
            let mut script = lock(&self.fetch_script);
            for status in statuses {
                script.push_back(Ok(GradingResult::with_status(*status)));
            }
        }
        self
    }

    pub fn submit_count(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Every request passed to `submit`, in call order.
    pub fn submissions(&self) -> Vec<SubmissionRequest> {
        lock(&self.submissions).clone()
    }
}

#[async_trait]
impl GradingApi for ScriptedGradingApi {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionReceipt, ApiError> {
        let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.submissions).push(request.clone());

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        lock(&self.submit_script).pop_front().unwrap_or_else(|| {
            Ok(SubmissionReceipt {
                id: format!("sub-{}", call),
            })
        })
    }

    async fn fetch_result(&self, _submission_id: &str) -> Result<GradingResult, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        let next = lock(&self.fetch_script).pop_front();
        let mut last = lock(&self.last_fetch);
        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => last
                .clone()
                .unwrap_or_else(|| Ok(GradingResult::with_status(GradingStatus::Processing))),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
