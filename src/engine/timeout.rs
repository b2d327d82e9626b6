//! Effective timeout resolution.
//!
//! A timeout of 0 (or an absent field) means unset. Step timeouts inherit
//! from the job; job timeouts never inherit from a step.

use std::time::Duration;

pub const DEFAULT_TIMEOUT_MINUTES: u64 = 360;

/// Step precedence: step > job > 360-minute default.
pub fn resolve_step_timeout(step_minutes: Option<u64>, job_minutes: Option<u64>) -> Duration {
    minutes(
        effective(step_minutes)
            .or(effective(job_minutes))
            .unwrap_or(DEFAULT_TIMEOUT_MINUTES),
    )
}

/// Job precedence: job > 360-minute default.
pub fn resolve_job_timeout(job_minutes: Option<u64>) -> Duration {
    minutes(effective(job_minutes).unwrap_or(DEFAULT_TIMEOUT_MINUTES))
}

fn effective(minutes: Option<u64>) -> Option<u64> {
    minutes.filter(|m| *m > 0)
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_wins_over_job() {
        assert_eq!(
            resolve_step_timeout(Some(10), Some(30)),
            Duration::from_secs(10 * 60)
        );
    }

    #[test]
    fn test_zero_step_falls_back_to_job() {
        assert_eq!(
            resolve_step_timeout(Some(0), Some(60)),
            Duration::from_secs(60 * 60)
        );
    }

    #[test]
    fn test_both_unset_uses_default() {
        assert_eq!(
            resolve_step_timeout(Some(0), Some(0)),
            Duration::from_secs(360 * 60)
        );
        assert_eq!(
            resolve_step_timeout(None, None),
            Duration::from_secs(360 * 60)
        );
    }

    #[test]
    fn test_job_timeout_never_inherits_from_step() {
        assert_eq!(resolve_job_timeout(None), Duration::from_secs(360 * 60));
        assert_eq!(resolve_job_timeout(Some(45)), Duration::from_secs(45 * 60));
    }
}
