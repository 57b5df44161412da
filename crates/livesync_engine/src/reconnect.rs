//! Backoff timer for re-opening the change feed.

use crate::config::ReconnectConfig;
use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Sleep};

/// Outcome of reporting a channel failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// A retry was scheduled.
    Scheduled {
        /// 1-based number of the scheduled retry.
        attempt: u32,
        /// Delay before the retry fires.
        delay: Duration,
    },
    /// A retry is already pending; nothing changed.
    AlreadyPending,
    /// The attempt budget is spent; polling stays the steady state.
    Exhausted,
}

/// Owns the attempt counter and the pending retry timer.
///
/// Cancel-safe: dropping the [`wait`](Self::wait) future keeps the timer.
#[derive(Debug)]
pub struct ReconnectManager {
    config: ReconnectConfig,
    attempt: u32,
    timer: Option<Pin<Box<Sleep>>>,
    exhausted: bool,
}

impl ReconnectManager {
    /// Creates a manager with no pending retry.
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt: 0,
            timer: None,
            exhausted: false,
        }
    }

    /// Number of failures since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns true if a retry is scheduled.
    pub fn is_pending(&self) -> bool {
        self.timer.is_some()
    }

    /// Returns true once the budget has been spent.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Records a failure and schedules the next retry if allowed.
    pub fn on_failure(&mut self) -> RetryDecision {
        if self.timer.is_some() {
            return RetryDecision::AlreadyPending;
        }
        if self.config.is_exhausted(self.attempt) {
            self.exhausted = true;
            return RetryDecision::Exhausted;
        }

        let delay = self.config.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.timer = Some(Box::pin(sleep(delay)));
        RetryDecision::Scheduled {
            attempt: self.attempt,
            delay,
        }
    }

    /// Resets the counter after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.exhausted = false;
        self.timer = None;
    }

    /// Drops any pending retry.
    pub fn cancel(&mut self) {
        self.timer = None;
    }

    /// Completes when the pending retry is due; never completes otherwise.
    pub async fn wait(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.await;
                self.timer = None;
            }
            None => pending().await,
        }
    }
}
