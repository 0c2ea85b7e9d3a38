use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Lowest accepted queries-per-second; smaller values are raised to it.
pub const MIN_QPS: f64 = 0.1;

/// Process-wide minimum-interval gate for one upstream target.
///
/// Callers are serialized on an async mutex, so the gap between any two consecutive
/// permitted calls is at least `1 / qps`. Waiters are not guaranteed FIFO order.
#[derive(Debug)]
pub struct UpstreamRateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl UpstreamRateLimiter {
    pub fn new(qps: f64) -> Self {
        Self {
            min_interval: min_interval_for(qps),
            last_call: Mutex::new(None),
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self {
            min_interval: Duration::ZERO,
            last_call: Mutex::new(None),
        }
    }

    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Suspends until the minimum interval since the previous permitted call has
    /// elapsed, then records the current time as the new last call.
    pub async fn acquire(&self) {
        let mut last_call = self.last_call.lock().await;

        if let Some(previous) = *last_call {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                tracing::trace!(
                    wait_ms = ready_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "waiting for upstream rate budget"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last_call = Some(Instant::now());
    }
}

/// Positive infinity means no spacing; NaN and values below the floor use the floor.
fn min_interval_for(qps: f64) -> Duration {
    if qps == f64::INFINITY {
        return Duration::ZERO;
    }
    let qps = if qps.is_finite() { qps.max(MIN_QPS) } else { MIN_QPS };
    Duration::from_secs_f64(1.0 / qps)
}
