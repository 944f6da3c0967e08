//! Reconnect backoff bookkeeping.
//!
//! The delay starts at one second and doubles on every consecutive failure up
//! to [`MAX_DELAY_SECS`]. Once the number of consecutive failures exceeds the
//! budget the lifecycle gives up.

use std::time::Duration;

/// Delay before the first failure is recorded.
pub const INITIAL_DELAY_SECS: u64 = 1;
/// Upper bound for the delay between attempts.
pub const MAX_DELAY_SECS: u64 = 16;
/// Default retry budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// What to do after a failure has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Sleep for the given delay, then try again.
    Retry(Duration),
    /// The budget is spent.
    Exhausted { failures: u32 },
}

/// Consecutive failure count and current delay for one connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffState {
    attempt: u32,
    delay_seconds: u64,
    max_attempts: u32,
}

impl BackoffState {
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            delay_seconds: INITIAL_DELAY_SECS,
            max_attempts,
        }
    }

    /// Records one failure and decides whether another attempt is allowed.
    ///
    /// After `n` consecutive failures the delay is `min(2^n, 16)` seconds.
    pub fn record_failure(&mut self) -> BackoffStep {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt > self.max_attempts {
            return BackoffStep::Exhausted {
                failures: self.attempt,
            };
        }
        self.delay_seconds = (self.delay_seconds * 2).min(MAX_DELAY_SECS);
        BackoffStep::Retry(self.delay())
    }

    /// Back to the initial state, after a successful connect or a planned refresh.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.delay_seconds = INITIAL_DELAY_SECS;
    }

    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub const fn delay_seconds(&self) -> u64 {
        self.delay_seconds
    }

    pub const fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub const fn retries_left(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt)
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}
