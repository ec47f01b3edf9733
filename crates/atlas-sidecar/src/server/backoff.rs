//! Restart delay policy.
//!
//! [`BackoffPolicy`] computes the delay before restart attempt `n` as
//! `first × factor^n`, clamped to `max`. The shipped default keeps
//! `factor = 1.0`, giving the flat one-second delay between restart
//! attempts; an exponential policy is a configuration change, not a
//! code change.

use std::time::Duration;

use crate::server::ResilienceSettings;

/// Restart backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`1.0` = constant delay).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(1000),
            max: Duration::from_secs(30),
            factor: 1.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given attempt number (0-indexed).
    ///
    /// The base is derived purely from the attempt number, so repeated
    /// calls for the same attempt always agree.
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped = self.first.as_secs_f64() * self.factor.powi(exp);

        if !unclamped.is_finite() || unclamped < 0.0 || unclamped > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped)
        }
    }
}

impl From<&ResilienceSettings> for BackoffPolicy {
    fn from(settings: &ResilienceSettings) -> Self {
        Self {
            first: Duration::from_millis(settings.initial_backoff_ms),
            max: Duration::from_millis(settings.max_backoff_ms),
            factor: settings.backoff_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_flat_one_second() {
        let policy = BackoffPolicy::default();
        for attempt in 0..10 {
            assert_eq!(policy.next(attempt), Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_exponential_growth() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
        };

        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(2), Duration::from_millis(400));
        assert_eq!(policy.next(3), Duration::from_millis(800));
    }

    #[test]
    fn test_clamped_to_max() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
        };
        assert_eq!(policy.next(10), Duration::from_secs(1));
    }

    #[test]
    fn test_first_exceeds_max() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(10),
            max: Duration::from_secs(5),
            factor: 2.0,
        };
        assert_eq!(policy.next(0), Duration::from_secs(5));
    }

    #[test]
    fn test_huge_attempt_clamps_to_max() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(60),
            factor: 2.0,
        };
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_from_resilience_settings() {
        let settings = ResilienceSettings::default();
        let policy = BackoffPolicy::from(&settings);
        assert_eq!(policy.next(0), Duration::from_millis(1000));
        assert_eq!(policy.next(5), Duration::from_millis(1000));
    }
}
