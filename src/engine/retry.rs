//! Effective retry policy resolution and backoff math.

use std::time::Duration;

use serde::Serialize;

use crate::config::RetryStrategy;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_COEFFICIENT: f64 = 2.0;
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

/// Fully resolved retry policy handed to the execution backend. The backend
/// enforces it; the engine only computes it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            backoff_coefficient: DEFAULT_BACKOFF_COEFFICIENT,
            max_interval: DEFAULT_MAX_INTERVAL,
        }
    }
}

impl RetryPolicy {
    /// Resolve a step's policy against the defaults field by field; a
    /// partial override keeps the defaults for the fields it omits.
    pub fn resolve(step: Option<&RetryStrategy>) -> Self {
        let Some(strategy) = step else {
            return Self::default();
        };
        Self {
            max_attempts: strategy.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            initial_interval: strategy
                .initial_interval
                .unwrap_or(DEFAULT_INITIAL_INTERVAL),
            backoff_coefficient: strategy
                .backoff_coefficient
                .unwrap_or(DEFAULT_BACKOFF_COEFFICIENT),
            max_interval: strategy.max_interval.unwrap_or(DEFAULT_MAX_INTERVAL),
        }
    }

    /// Wait before the retry following attempt `attempt` (0-indexed):
    /// `initial * coefficient^attempt`, capped at `max_interval`.
    pub fn interval_for_attempt(&self, attempt: u32) -> Duration {
        let scaled =
            self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(attempt as i32);
        let capped = scaled.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::resolve(None);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.backoff_coefficient, 2.0);
        assert_eq!(policy.max_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let strategy = RetryStrategy {
            max_attempts: Some(5),
            initial_interval: None,
            backoff_coefficient: None,
            max_interval: Some(Duration::from_secs(30)),
        };
        let policy = RetryPolicy::resolve(Some(&strategy));
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_interval, DEFAULT_INITIAL_INTERVAL);
        assert_eq!(policy.backoff_coefficient, DEFAULT_BACKOFF_COEFFICIENT);
        assert_eq!(policy.max_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.interval_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.interval_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.interval_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.interval_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.interval_for_attempt(4), Duration::from_secs(16));
        assert_eq!(policy.interval_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_coefficient_one_is_flat() {
        let strategy = RetryStrategy {
            max_attempts: None,
            initial_interval: Some(Duration::from_millis(500)),
            backoff_coefficient: Some(1.0),
            max_interval: None,
        };
        let policy = RetryPolicy::resolve(Some(&strategy));
        assert_eq!(policy.interval_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.interval_for_attempt(7), Duration::from_millis(500));
    }
}
