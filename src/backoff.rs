//! Backoff policies for the health poller and push-channel reconnects.

use std::time::Duration;

/// Failure backoff for the health poller.
///
/// The delay starts at the base interval, doubles on every failure up to
/// the cap, and snaps back to the base interval on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffState {
    base: Duration,
    max: Duration,
    current: Duration,
    consecutive_failures: u32,
}

impl BackoffState {
    /// Create a backoff starting at `base`, never exceeding `max`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
            consecutive_failures: 0,
        }
    }

    /// Delay before the next scheduled poll.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// Failures since the last success or reset.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a failed poll and return the new delay.
    ///
    /// After `n` consecutive failures the delay is
    /// `min(base * 2^n, max)`.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.current = self.current.saturating_mul(2).min(self.max);
        self.current
    }

    /// Record a successful poll (or a manual refresh) and return the base delay.
    pub fn reset(&mut self) -> Duration {
        self.consecutive_failures = 0;
        self.current = self.base;
        self.current
    }
}

/// Exponential reconnect schedule for the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Failed connects tolerated before giving up on the channel.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before reconnecting after `attempts` consecutive failures
    /// (1-indexed): `base * 2^(attempts - 1)`, capped.
    #[must_use]
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Whether `attempts` consecutive failures exhaust the budget.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl From<&crate::config::TrackerConfig> for ReconnectPolicy {
    fn from(config: &crate::config::TrackerConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_base_ms),
            max_delay: Duration::from_millis(config.reconnect_max_ms),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}
