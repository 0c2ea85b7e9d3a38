use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::{Backoff, RetryConfig};
use crate::UpstreamId;

/// Access policy for one upstream target: throttling, retry and breaker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamPolicy {
    pub upstream: UpstreamId,
    /// Aggregate queries-per-second allowed from this process.
    pub qps: f64,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
    pub timeout: Duration,
}

impl UpstreamPolicy {
    /// Nominatim's usage policy caps anonymous clients at one request per second.
    pub fn nominatim_default() -> Self {
        Self {
            upstream: UpstreamId::Nominatim,
            qps: 1.0,
            retry: RetryConfig::new(
                2,
                Backoff::exponential(Duration::from_millis(300), Duration::from_secs(3)),
            ),
            breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                window: Duration::from_secs(10),
                reset_timeout: Duration::from_secs(30),
            },
            timeout: Duration::from_secs(10),
        }
    }

    pub fn open_meteo_default() -> Self {
        Self {
            upstream: UpstreamId::OpenMeteo,
            qps: 10.0,
            retry: RetryConfig::new(
                2,
                Backoff::exponential(Duration::from_millis(500), Duration::from_secs(3)),
            ),
            breaker: CircuitBreakerConfig::default(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn default_for(upstream: UpstreamId) -> Self {
        match upstream {
            UpstreamId::Nominatim => Self::nominatim_default(),
            UpstreamId::OpenMeteo => Self::open_meteo_default(),
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}
