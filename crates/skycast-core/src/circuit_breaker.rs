use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Runtime circuit state for one upstream target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures within `window` that open the circuit.
    pub failure_threshold: u32,
    /// Observation window for counting failures.
    pub window: Duration,
    /// Time an open circuit waits before letting probes through.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of a breaker used for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub recent_failures: usize,
    pub total_failures: u64,
    pub total_successes: u64,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    total_failures: u64,
    total_successes: u64,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            total_failures: 0,
            total_successes: 0,
        }
    }
}

/// Thread-safe circuit breaker counting failures in a sliding time window.
///
/// The half-open state is purely time gated: once `reset_timeout` has elapsed every
/// caller is allowed through until a success closes the circuit or a failure reopens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Returns `false` while open and the reset timeout has not elapsed.
    /// Moves `Open` to `HalfOpen` once it has.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let can_probe = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);

                if can_probe {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!("circuit breaker half-open; allowing probe requests");
                }
                can_probe
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(from = ?inner.state, "circuit breaker closed after success");
        }
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
        inner.total_successes = inner.total_successes.saturating_add(1);
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        let window = self.config.window;

        while inner
            .failures
            .front()
            .is_some_and(|failed_at| now.duration_since(*failed_at) > window)
        {
            inner.failures.pop_front();
        }
        inner.failures.push_back(now);
        inner.total_failures = inner.total_failures.saturating_add(1);

        let threshold = self.config.failure_threshold.max(1) as usize;
        if inner.failures.len() >= threshold {
            if inner.state != CircuitState::Open {
                tracing::warn!(
                    failures = inner.failures.len(),
                    window_ms = window.as_millis() as u64,
                    "circuit breaker opened"
                );
            }
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn recent_failures(&self) -> usize {
        self.lock().failures.len()
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            recent_failures: inner.failures.len(),
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
