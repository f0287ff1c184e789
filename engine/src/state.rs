//! Per-table sync state, statistics, and the retry/throttle policies that
//! read them.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What caused a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Debounced local change or background sweep
    Auto,
    /// Explicit user request
    Manual,
    /// First sync after startup
    Initial,
    /// Scheduled backoff retry
    Retry,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Auto => "auto",
            Trigger::Manual => "manual",
            Trigger::Initial => "initial",
            Trigger::Retry => "retry",
        }
    }

    /// Whether failures of this trigger may schedule a backoff retry.
    pub fn retries_on_failure(&self) -> bool {
        !matches!(self, Trigger::Manual)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable sync state of one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_syncing: bool,
    pub last_synced: Option<Timestamp>,
    pub sync_failed: bool,
    pub pending_sync: bool,
    pub data_changed: bool,
}

/// Attempt counters for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub attempt_count: u32,
    pub last_attempt: Option<Timestamp>,
    pub success_count: u32,
    pub failure_count: u32,
    /// Failures since the last success; drives backoff.
    pub consecutive_failures: u32,
}

impl SyncStats {
    /// Note that an attempt started.
    pub fn record_attempt(&mut self, now: Timestamp) {
        self.attempt_count += 1;
        self.last_attempt = Some(now);
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.consecutive_failures += 1;
    }
}

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after consecutive failures before giving up.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` retries.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// The retry to schedule after `consecutive_failures` failures, if any.
    pub fn next_retry(&self, consecutive_failures: u32) -> Option<Duration> {
        if consecutive_failures == 0 || consecutive_failures > self.max_retries {
            None
        } else {
            Some(self.delay_for_attempt(consecutive_failures))
        }
    }

    /// Whether this failure is the one that used up the last retry.
    ///
    /// True for exactly one value, so later failures stay quiet until a
    /// success resets the count.
    pub fn is_exhausted_by(&self, consecutive_failures: u32) -> bool {
        consecutive_failures == self.max_retries.saturating_add(1)
    }
}

/// Minimum spacing between attempts on the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub window: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(10_000),
        }
    }
}

impl ThrottlePolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// True if the previous attempt started less than `window` ago.
    pub fn should_throttle(&self, stats: &SyncStats, now: Timestamp) -> bool {
        if stats.attempt_count == 0 {
            return false;
        }
        match stats.last_attempt {
            Some(last) => u128::from(now.saturating_sub(last)) < self.window.as_millis(),
            None => false,
        }
    }
}
