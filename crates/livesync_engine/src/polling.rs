//! Periodic full refetch while the change feed is down.

use std::future::pending;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Interval driver for the polling fallback.
///
/// Inactive by default. Starting it yields a tick immediately, then every
/// `period`; stopping it drops the interval so no further ticks fire.
#[derive(Debug)]
pub struct PollingFallback {
    period: Duration,
    interval: Option<Interval>,
}

impl PollingFallback {
    /// Creates an inactive fallback.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Returns the polling period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns true while polling.
    pub fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    /// Starts polling. Returns false if it was already running.
    pub fn start(&mut self) -> bool {
        if self.interval.is_some() {
            return false;
        }
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(ticker);
        true
    }

    /// Stops polling. Returns false if it was not running.
    pub fn stop(&mut self) -> bool {
        self.interval.take().is_some()
    }

    /// Completes at the next tick; never completes while inactive.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Instant};

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_immediate_then_periodic() {
        let mut polling = PollingFallback::new(Duration::from_secs(15));
        assert!(polling.start());
        assert!(!polling.start());

        let start = Instant::now();
        polling.tick().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        polling.tick().await;
        assert!(start.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_fallback_never_ticks() {
        let mut polling = PollingFallback::new(Duration::from_secs(1));
        assert!(!polling.is_active());
        assert!(timeout(Duration::from_secs(10), polling.tick()).await.is_err());

        polling.start();
        polling.tick().await;
        assert!(polling.stop());
        assert!(!polling.stop());
        assert!(timeout(Duration::from_secs(10), polling.tick()).await.is_err());
    }
}
