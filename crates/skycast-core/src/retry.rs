//! Retry policy with capped exponential backoff.

use std::time::Duration;

/// Exponential backoff: `min(base * factor ^ attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// The delay after the first failed attempt.
    pub base: Duration,
    /// Growth per attempt.
    pub factor: f64,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Spread each delay uniformly over `[0.5, 1.5]` of its nominal value.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(300), Duration::from_secs(3))
    }
}

impl Backoff {
    /// Doubling backoff without jitter.
    pub const fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            base,
            factor: 2.0,
            max,
            jitter: false,
        }
    }

    /// Calculate the delay to sleep after the 0-based `attempt` failed.
    pub fn delay(self, attempt: u32) -> Duration {
        let scale = self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        let seconds = self.base.as_secs_f64() * scale;
        let capped_seconds = if seconds.is_finite() {
            seconds.min(self.max.as_secs_f64())
        } else {
            self.max.as_secs_f64()
        };

        let delay = Duration::from_secs_f64(capped_seconds.max(0.0));
        if !self.jitter {
            return delay;
        }

        delay.mul_f64(0.5 + fastrand::f64())
    }
}

/// Configuration for the retry loop around one upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Disable retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub const fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// 429 and every 5xx are transient; other non-2xx statuses are final.
    pub const fn should_retry_status(&self, status: u16) -> bool {
        status == 429 || (status >= 500 && status < 600)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let backoff = Backoff::exponential(Duration::from_millis(250), Duration::from_secs(3));

        assert_eq!(backoff.delay(0), Duration::from_millis(250));
        assert_eq!(backoff.delay(1), Duration::from_millis(500));
        assert_eq!(backoff.delay(2), Duration::from_secs(1));
        assert_eq!(backoff.delay(3), Duration::from_secs(2));
        assert_eq!(backoff.delay(4), Duration::from_secs(3));
        assert_eq!(backoff.delay(60), Duration::from_secs(3));
    }

    #[test]
    fn jittered_backoff_stays_within_half_band() {
        let backoff = Backoff {
            jitter: true,
            ..Backoff::exponential(Duration::from_millis(100), Duration::from_secs(1))
        };

        for _ in 0..10 {
            for attempt in 0..5 {
                let delay_ms = backoff.delay(attempt).as_millis() as f64;
                let expected_capped = (100.0 * 2_f64.powi(attempt as i32)).min(1000.0);

                assert!(delay_ms >= expected_capped * 0.49, "attempt={attempt}, delay_ms={delay_ms}");
                assert!(delay_ms <= expected_capped * 1.51, "attempt={attempt}, delay_ms={delay_ms}");
            }
        }
    }

    #[test]
    fn default_retries_transient_statuses_only() {
        let config = RetryConfig::default();

        assert_eq!(config.max_retries, 2);
        assert_eq!(config.total_attempts(), 3);
        assert!(config.should_retry_status(429));
        assert!(config.should_retry_status(500));
        assert!(config.should_retry_status(503));
        assert!(config.should_retry_status(599));
        assert!(!config.should_retry_status(400));
        assert!(!config.should_retry_status(404));
        assert!(!config.should_retry_status(408));
    }

    #[test]
    fn no_retry_means_single_attempt() {
        let config = RetryConfig::no_retry();

        assert_eq!(config.max_retries, 0);
        assert_eq!(config.total_attempts(), 1);
    }
}
