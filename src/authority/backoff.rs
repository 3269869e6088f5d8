//! # Exponential Backoff
//!
//! Retry schedule for authority requests: intervals start at 1s and grow by
//! 1.5x per attempt, capped at 30s per interval. The caller enforces the
//! overall elapsed-time budget.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current_ms: f64,
    factor: f64,
    max_interval_ms: u64,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(initial_ms: u64, factor: f64, max_interval_ms: u64) -> Self {
        Self {
            current_ms: initial_ms as f64,
            factor,
            max_interval_ms,
        }
    }

    /// The retry policy shared by every authority request.
    #[must_use]
    pub fn authority_default() -> Self {
        Self::new(
            crate::constants::BACKOFF_INITIAL_MS,
            crate::constants::BACKOFF_FACTOR,
            crate::constants::BACKOFF_MAX_INTERVAL_MS,
        )
    }

    /// Get the next backoff duration and advance the schedule.
    pub fn next_interval(&mut self) -> Duration {
        let interval_ms = (self.current_ms as u64).min(self.max_interval_ms);
        self.current_ms *= self.factor;
        Duration::from_millis(interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_grows_by_factor() {
        let mut backoff = ExponentialBackoff::new(1000, 1.5, 30_000);

        assert_eq!(backoff.next_interval(), Duration::from_millis(1000));
        assert_eq!(backoff.next_interval(), Duration::from_millis(1500));
        assert_eq!(backoff.next_interval(), Duration::from_millis(2250));
        assert_eq!(backoff.next_interval(), Duration::from_millis(3375));
        assert_eq!(backoff.next_interval(), Duration::from_millis(5062));
    }

    #[test]
    fn schedule_caps_at_max_interval() {
        let mut backoff = ExponentialBackoff::new(1000, 1.5, 30_000);

        let mut last = Duration::ZERO;
        for _ in 0..20 {
            last = backoff.next_interval();
        }
        assert_eq!(last, Duration::from_millis(30_000));
    }

    #[test]
    fn default_policy_matches_constants() {
        let mut backoff = ExponentialBackoff::authority_default();
        assert_eq!(backoff.next_interval(), Duration::from_millis(1000));
    }
}
