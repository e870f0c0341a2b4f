//! Exponential retry backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::RetryConfig;

/// Backoff schedule for settlement re-attempts:
/// `delay = min(max_delay, base_delay * 2^(attempt-1))`, attempt >= 1.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(2_000),
            max_delay: Duration::from_millis(60_000),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before the given attempt number (clamped to >= 1).
    pub fn delay_for(&self, attempt: i32) -> Duration {
        let exponent = (attempt.max(1) - 1).min(31) as u32;
        let factor = 1u64 << exponent;
        let delay_ms = (self.base_delay.as_millis() as u64)
            .saturating_mul(factor)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(delay_ms)
    }

    /// Wall-clock due time for the given attempt number.
    pub fn next_retry_at(&self, attempt: i32) -> DateTime<Utc> {
        let delay =
            chrono::Duration::from_std(self.delay_for(attempt)).unwrap_or(chrono::Duration::MAX);
        Utc::now() + delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_uses_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
    }

    #[test]
    fn test_doubling_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(2), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(16_000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(32_000));
        // Attempt 6 would be 64s, capped at 60s
        assert_eq!(policy.delay_for(6), Duration::from_millis(60_000));
        assert_eq!(policy.delay_for(50), Duration::from_millis(60_000));
    }

    #[test]
    fn test_monotonically_non_decreasing() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=64 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            previous = delay;
        }
    }

    #[test]
    fn test_attempt_clamped_to_one() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), policy.delay_for(1));
        assert_eq!(policy.delay_for(-5), policy.delay_for(1));
    }

    #[test]
    fn test_next_retry_at_close_to_now_plus_delay() {
        let policy = RetryPolicy::default();
        let before = Utc::now();
        let due = policy.next_retry_at(1);
        let lower = before + chrono::Duration::milliseconds(1_900);
        let upper = before + chrono::Duration::milliseconds(3_000);
        assert!(due >= lower && due <= upper, "due time out of range: {}", due);
    }

    #[test]
    fn test_from_config() {
        let config = RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 500,
            max_attempts: 3,
            poll_interval_secs: 1,
            batch_size: 5,
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.max_attempts, 3);
    }
}
