//! Bounded retry schedules with exponential backoff and jitter
//!
//! A `RetryPolicy` is a plain value passed to whoever needs to retry, and its
//! schedule is a finite iterator of delays, so backoff behavior is testable
//! without sleeping.

use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Fraction of each delay added as random jitter (0..=ratio of the delay).
const JITTER_RATIO: f64 = 0.5;

/// Backoff policy: bounded attempts, base delay doubling per attempt, capped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Policy for transient network / 5xx failures
    pub fn transient(config: &RetryConfig) -> Self {
        Self::new(
            config.transient_max_attempts,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    /// Policy for upstream rate-limit signals (more attempts, same cap)
    pub fn rate_limit(config: &RetryConfig) -> Self {
        Self::new(
            config.rate_limit_max_attempts,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    /// Deterministic backoff schedule: one delay per retry.
    ///
    /// `max_attempts` total attempts means `max_attempts - 1` delays.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let retries = self.max_attempts.saturating_sub(1);
        (0..retries).map(move |attempt| {
            let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
            self.base_delay
                .checked_mul(factor)
                .unwrap_or(self.max_delay)
                .min(self.max_delay)
        })
    }

    /// A delay from the schedule with jitter applied
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        let jitter_cap = delay.mul_f64(JITTER_RATIO);
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..=jitter_cap);
        (delay + jitter).min(self.max_delay)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn policy(attempts: u32, base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            attempts,
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
        )
    }

    #[test]
    fn schedule_doubles_and_caps() {
        let delays: Vec<_> = policy(6, 100, 500).delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn single_attempt_means_no_retries() {
        assert_eq!(policy(1, 100, 500).delays().count(), 0);
        assert_eq!(policy(0, 100, 500).delays().count(), 0);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = policy(3, 100, 10_000);
        let base = Duration::from_millis(200);
        for _ in 0..100 {
            let jittered = p.with_jitter(base);
            assert!(jittered >= base);
            assert!(jittered <= Duration::from_millis(300));
        }
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let p = policy(3, 100, 250);
        let jittered = p.with_jitter(Duration::from_millis(250));
        assert!(jittered <= Duration::from_millis(250));
    }

    #[test]
    fn from_config_budgets_differ_by_class() {
        let config = RetryConfig::default();
        assert!(
            RetryPolicy::rate_limit(&config).max_attempts
                >= RetryPolicy::transient(&config).max_attempts
        );
    }
}
