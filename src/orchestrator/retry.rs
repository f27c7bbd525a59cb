//! Exponential backoff with full jitter.

use crate::config::OrchestratorConfig;
use rand::Rng;
use std::time::Duration;

/// Backoff schedule for retryable dispatch failures.
///
/// `delay_k = min(max_delay, initial_delay * 2^(k-1))`, then a uniform
/// sample in `[0, delay_k]` (full jitter) is slept.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.retry_initial_delay,
            max_delay: config.retry_max_delay,
        }
    }

    /// Upper bound of the backoff window for a 1-based attempt number.
    pub fn delay_cap(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let scaled = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        scaled.min(self.max_delay)
    }

    /// Jittered delay to sleep before retry `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self.delay_cap(attempt);
        if cap.is_zero() {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(0..=cap.as_millis() as u64);
        Duration::from_millis(jittered)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_delay_caps_double_then_saturate() {
        let p = policy();
        assert_eq!(p.delay_cap(1), Duration::from_secs(1));
        assert_eq!(p.delay_cap(2), Duration::from_secs(2));
        assert_eq!(p.delay_cap(3), Duration::from_secs(4));
        assert_eq!(p.delay_cap(6), Duration::from_secs(30));
        assert_eq!(p.delay_cap(32), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let p = policy();
        for attempt in 1..=5 {
            for _ in 0..50 {
                assert!(p.delay_for(attempt) <= p.delay_cap(attempt));
            }
        }
    }
}
