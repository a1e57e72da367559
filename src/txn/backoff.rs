use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry bounds and backoff shape for the transaction runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wall-clock budget across all attempts and backoff sleeps.
    pub max_elapsed: Duration,
    pub initial_backoff: Duration,
    /// Cap on a single backoff delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_elapsed: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = elapsed;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Base delay before re-running attempt `attempt + 1`, where `attempt`
    /// counts failures so far (1-based). Doubles per failure, saturating,
    /// capped at `max_backoff`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff.as_millis().max(1) as u64;
        let cap_ms = (self.max_backoff.as_millis() as u64).max(base_ms);
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
    }

    /// Base delay with uniform jitter in `[0, base]`, so concurrent
    /// callers retrying after the same conflict do not stampede.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=base_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_doubles_until_cap() {
        let policy = RetryPolicy::new()
            .initial_backoff(Duration::from_millis(10))
            .max_backoff(Duration::from_millis(100));

        assert_eq!(policy.base_delay(1), Duration::from_millis(10));
        assert_eq!(policy.base_delay(2), Duration::from_millis(20));
        assert_eq!(policy.base_delay(3), Duration::from_millis(40));
        assert_eq!(policy.base_delay(4), Duration::from_millis(80));
        assert_eq!(policy.base_delay(5), Duration::from_millis(100));
        assert_eq!(policy.base_delay(6), Duration::from_millis(100));
    }

    #[test]
    fn test_base_delay_is_monotonic_and_capped() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=64 {
            let delay = policy.base_delay(attempt);
            assert!(delay >= previous);
            assert!(delay <= policy.max_backoff);
            previous = delay;
        }
    }

    #[test]
    fn test_jitter_stays_within_base() {
        let policy = RetryPolicy::new()
            .initial_backoff(Duration::from_millis(50))
            .max_backoff(Duration::from_millis(400));

        for attempt in 1..=8 {
            let base = policy.base_delay(attempt);
            for _ in 0..32 {
                assert!(policy.jittered_delay(attempt) <= base);
            }
        }
    }

    #[test]
    fn test_no_overflow_at_large_attempt_numbers() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(u32::MAX), policy.max_backoff);
    }
}
