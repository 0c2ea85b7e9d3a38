//! Rolling-window request metrics per route.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Latency samples kept per route.
pub const DEFAULT_WINDOW: usize = 1000;

/// Counters and latency window for one route.
#[derive(Debug, Clone, Default)]
struct RouteMetrics {
    latencies_ms: VecDeque<u64>,
    requests: u64,
    failures: u64,
}

impl RouteMetrics {
    fn observe(&mut self, latency_ms: u64, is_error: bool, window: usize) {
        self.requests = self.requests.saturating_add(1);
        if is_error {
            self.failures = self.failures.saturating_add(1);
        }
        self.latencies_ms.push_back(latency_ms);
        while self.latencies_ms.len() > window {
            self.latencies_ms.pop_front();
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let mut sorted: Vec<u64> = self.latencies_ms.iter().copied().collect();
        sorted.sort_unstable();

        let failure_rate = if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        };

        MetricsSnapshot {
            requests: self.requests,
            failures: self.failures,
            failure_rate,
            p50_ms: percentile(&sorted, 50.0),
            p90_ms: percentile(&sorted, 90.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
            median_ms: median(&sorted),
            avg_ms: mean(&sorted),
            samples: sorted.len(),
        }
    }
}

/// Point-in-time metrics for one route, or for all routes combined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub failure_rate: f64,
    pub p50_ms: Option<f64>,
    pub p90_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub median_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub samples: usize,
}

/// Global and per-route metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub overall: MetricsSnapshot,
    pub by_path: BTreeMap<String, MetricsSnapshot>,
}

/// Route metrics plus the order in which routes were first seen.
#[derive(Debug, Default)]
struct Routes {
    first_seen: Vec<String>,
    metrics: HashMap<String, RouteMetrics>,
}

/// Process-wide metrics aggregator, safe to share between threads.
#[derive(Debug)]
pub struct MetricsRegistry {
    window: usize,
    routes: Mutex<Routes>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl MetricsRegistry {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            routes: Mutex::new(Routes::default()),
        }
    }

    pub fn observe(&self, route: &str, latency_ms: u64, is_error: bool) {
        let window = self.window;
        let mut routes = self.lock();
        match routes.metrics.get_mut(route) {
            Some(metrics) => metrics.observe(latency_ms, is_error, window),
            None => {
                let mut metrics = RouteMetrics::default();
                metrics.observe(latency_ms, is_error, window);
                routes.first_seen.push(route.to_owned());
                routes.metrics.insert(route.to_owned(), metrics);
            }
        }
    }

    pub fn snapshot_route(&self, route: &str) -> Option<MetricsSnapshot> {
        self.lock().metrics.get(route).map(RouteMetrics::snapshot)
    }

    /// Per-route snapshots plus an approximate overall view.
    ///
    /// The overall window concatenates route windows in first-seen order and keeps the
    /// last `window` samples of that sequence, so it is not a time-ordered view across
    /// routes.
    pub fn report(&self) -> MetricsReport {
        let routes = self.lock();
        let mut overall = RouteMetrics::default();
        let mut by_path = BTreeMap::new();

        for route in &routes.first_seen {
            let Some(metrics) = routes.metrics.get(route) else {
                continue;
            };
            overall.requests = overall.requests.saturating_add(metrics.requests);
            overall.failures = overall.failures.saturating_add(metrics.failures);
            overall.latencies_ms.extend(metrics.latencies_ms.iter().copied());
            by_path.insert(route.clone(), metrics.snapshot());
        }
        while overall.latencies_ms.len() > self.window {
            overall.latencies_ms.pop_front();
        }

        MetricsReport {
            overall: overall.snapshot(),
            by_path,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Nearest-rank estimate at index `round(p / 100 * (n - 1))` of a sorted slice.
fn percentile(sorted: &[u64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let last = sorted.len() - 1;
    let index = ((p / 100.0) * last as f64).round() as usize;
    Some(sorted[index.min(last)] as f64)
}

fn median(sorted: &[u64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2] as f64),
        _ => Some((sorted[n / 2 - 1] as f64 + sorted[n / 2] as f64) / 2.0),
    }
}

fn mean(samples: &[u64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let total: f64 = samples.iter().map(|value| *value as f64).sum();
    Some(total / samples.len() as f64)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn empty_route_has_no_percentiles() {
        let registry = MetricsRegistry::default();
        let report = registry.report();

        assert_eq!(report.overall.requests, 0);
        assert_eq!(report.overall.failure_rate, 0.0);
        assert_eq!(report.overall.p50_ms, None);
        assert_eq!(report.overall.avg_ms, None);
        assert!(report.by_path.is_empty());
    }

    #[test]
    fn failure_rate_counts_errors_over_requests() {
        let registry = MetricsRegistry::default();
        for latency in 1..=4 {
            registry.observe("/forecast", latency, false);
        }
        let clean = registry.snapshot_route("/forecast").expect("route observed");
        assert_eq!(clean.failure_rate, 0.0);

        registry.observe("/forecast", 5, true);
        let snapshot = registry.snapshot_route("/forecast").expect("route observed");
        assert_eq!(snapshot.requests, 5);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.failure_rate, 1.0 / 5.0);
    }

    #[test]
    fn percentiles_use_rounded_nearest_rank() {
        let registry = MetricsRegistry::default();
        for latency in 1..=10 {
            registry.observe("/predict", latency * 10, false);
        }

        let snapshot = registry.snapshot_route("/predict").expect("route observed");
        // n = 10: p50 -> round(4.5) = 5 (ties away from zero), p90 -> round(8.1) = 8.
        assert_eq!(snapshot.p50_ms, Some(60.0));
        assert_eq!(snapshot.p90_ms, Some(90.0));
        assert_eq!(snapshot.p99_ms, Some(100.0));
        assert_eq!(snapshot.median_ms, Some(55.0));
        assert_eq!(snapshot.avg_ms, Some(55.0));
        assert_eq!(snapshot.samples, 10);
    }

    #[test]
    fn window_drops_oldest_samples_but_keeps_counters() {
        let registry = MetricsRegistry::new(3);
        for latency in [100, 1, 2, 3] {
            registry.observe("/health", latency, false);
        }

        let snapshot = registry.snapshot_route("/health").expect("route observed");
        assert_eq!(snapshot.requests, 4);
        assert_eq!(snapshot.samples, 3);
        assert_eq!(snapshot.p99_ms, Some(3.0));
    }

    #[test]
    fn report_combines_routes_into_overall() {
        let registry = MetricsRegistry::default();
        registry.observe("/a", 10, false);
        registry.observe("/b", 20, true);

        let report = registry.report();
        assert_eq!(report.overall.requests, 2);
        assert_eq!(report.overall.failures, 1);
        assert_eq!(report.overall.samples, 2);
        assert_eq!(report.by_path.len(), 2);
        assert_eq!(report.by_path["/b"].failures, 1);
    }

    #[test]
    fn overall_window_follows_first_seen_route_order() {
        let registry = MetricsRegistry::new(2);
        registry.observe("/zeta", 100, false);
        registry.observe("/alpha", 1, false);
        registry.observe("/alpha", 2, false);

        let report = registry.report();
        assert_eq!(report.overall.requests, 3);
        assert_eq!(report.overall.samples, 2);
        assert_eq!(report.overall.avg_ms, Some(1.5));
    }

    #[test]
    fn concurrent_observations_are_all_counted() {
        let registry = Arc::new(MetricsRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for latency in 0..100 {
                        registry.observe("/api/geocode/search", latency, false);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("observer thread should finish");
        }

        let snapshot = registry
            .snapshot_route("/api/geocode/search")
            .expect("route observed");
        assert_eq!(snapshot.requests, 800);
        assert_eq!(snapshot.samples, 800);
    }
}
