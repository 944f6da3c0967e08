//! Timing policy for refresh checks.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::DEFAULT_REFRESH_INTERVAL_SECONDS;

/// Decides when the host's refresh hook should be consulted.
///
/// The scheduler holds no clock state of its own; the read loop keeps
/// `last_checked_at` and asks whether the interval has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshScheduler {
    interval: Duration,
}

impl RefreshScheduler {
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// True once at least `interval` has passed since `last_checked_at`.
    pub fn is_due(&self, last_checked_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_checked_at) >= self.interval
    }
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECONDS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_due() {
        let scheduler = RefreshScheduler::default();
        let start = Instant::now();

        assert!(!scheduler.is_due(start, start));
        assert!(!scheduler.is_due(start, start + Duration::from_millis(9_999)));
        assert!(scheduler.is_due(start, start + Duration::from_secs(10)));
        assert!(scheduler.is_due(start, start + Duration::from_secs(60)));
    }

    #[test]
    fn test_clock_going_backwards_is_not_due() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(1));
        let later = Instant::now() + Duration::from_secs(5);
        assert!(!scheduler.is_due(later, later - Duration::from_secs(3)));
    }
}
