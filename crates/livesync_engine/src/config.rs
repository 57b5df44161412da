//! Configuration for live collections.

use rand::Rng;
use std::time::Duration;

/// Configuration for a live collection.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Reconnection behavior for the change feed.
    pub reconnect: ReconnectConfig,
    /// Interval of the polling fallback.
    pub poll_interval: Duration,
    /// How long a new subscription may take to report `Connected`.
    pub connect_timeout: Duration,
    /// Whether to run one catch-up fetch when the feed comes back.
    pub resync_on_reconnect: bool,
    /// Grace period for delete tombstones. `None` disables them.
    pub delete_grace: Option<Duration>,
}

impl LiveConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            poll_interval: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            resync_on_reconnect: true,
            delete_grace: None,
        }
    }

    /// Sets the reconnection configuration.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enables or disables the catch-up fetch on reconnect.
    pub fn with_resync_on_reconnect(mut self, enabled: bool) -> Self {
        self.resync_on_reconnect = enabled;
        self
    }

    /// Enables delete tombstones with the given grace period.
    pub fn with_delete_grace(mut self, grace: Duration) -> Self {
        self.delete_grace = Some(grace);
        self
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for change-feed reconnection.
///
/// The delay before retry `n` (0-indexed) is
/// `base_delay * multiplier^n + uniform(0, max_jitter)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of failed attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the delay, jitter included.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Upper bound of the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl ReconnectConfig {
    /// Creates a configuration that gives up after `max_attempts` failures.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 1.5,
            max_jitter: Duration::from_secs(1),
        }
    }

    /// Creates a configuration that never gives up.
    pub fn unlimited() -> Self {
        Self {
            max_attempts: None,
            ..Self::new(0)
        }
    }

    /// Creates a configuration that never retries; the first failure is final.
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the maximum jitter.
    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Returns true once `attempt` failures exhaust the budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }

    /// Calculates the delay before retry `attempt` (0-indexed), without jitter.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Calculates the delay before retry `attempt` (0-indexed), jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..=self.max_jitter)
        };
        (base + jitter).min(self.max_delay)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
