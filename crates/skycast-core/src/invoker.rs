//! Retrying, rate-limited, circuit-broken access to one upstream target.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::observability::InstrumentedHttpClient;
use crate::policy::UpstreamPolicy;
use crate::retry::RetryConfig;
use crate::throttling::UpstreamRateLimiter;
use crate::UpstreamId;

/// Failure classification surfaced to the boundary layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    /// The breaker rejected the call without touching the network.
    BreakerOpen,
    /// Retries exhausted, a non-retryable status, or an unparseable body.
    Upstream,
    /// The body parsed but does not have the expected structure.
    UnexpectedShape,
}

/// Structured upstream error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    kind: UpstreamErrorKind,
    upstream: UpstreamId,
    message: String,
    status: Option<u16>,
}

impl UpstreamError {
    pub fn breaker_open(upstream: UpstreamId) -> Self {
        Self {
            kind: UpstreamErrorKind::BreakerOpen,
            upstream,
            message: String::from("upstream temporarily unavailable (circuit open)"),
            status: None,
        }
    }

    pub fn upstream(upstream: UpstreamId, message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Upstream,
            upstream,
            message: message.into(),
            status: None,
        }
    }

    pub fn status(upstream: UpstreamId, status: u16) -> Self {
        Self {
            kind: UpstreamErrorKind::Upstream,
            upstream,
            message: format!("upstream status {status}"),
            status: Some(status),
        }
    }

    pub fn unexpected_shape(upstream: UpstreamId, message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::UnexpectedShape,
            upstream,
            message: message.into(),
            status: None,
        }
    }

    pub const fn kind(&self) -> UpstreamErrorKind {
        self.kind
    }

    pub const fn upstream_id(&self) -> UpstreamId {
        self.upstream
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Last upstream HTTP status, when the failure came from a response.
    pub const fn upstream_status(&self) -> Option<u16> {
        self.status
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            UpstreamErrorKind::BreakerOpen => "upstream.breaker_open",
            UpstreamErrorKind::Upstream => "upstream.error",
            UpstreamErrorKind::UnexpectedShape => "upstream.unexpected_shape",
        }
    }

    /// Status code the boundary layer answers with.
    pub const fn http_status(&self) -> u16 {
        match self.kind {
            UpstreamErrorKind::BreakerOpen => 503,
            UpstreamErrorKind::Upstream | UpstreamErrorKind::UnexpectedShape => 502,
        }
    }
}

impl Display for UpstreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} upstream error: {}", self.upstream, self.message)
    }
}

impl std::error::Error for UpstreamError {}

/// Composes breaker gate, rate limiter and retry loop around an instrumented transport.
///
/// One invoker owns the breaker for one upstream target; clone the `Arc` to share it.
pub struct UpstreamInvoker {
    upstream: UpstreamId,
    client: Arc<dyn HttpClient>,
    breaker: CircuitBreaker,
    limiter: Arc<UpstreamRateLimiter>,
    retry: RetryConfig,
    timeout_ms: u64,
}

impl UpstreamInvoker {
    pub fn new(
        upstream: UpstreamId,
        client: Arc<dyn HttpClient>,
        breaker: CircuitBreakerConfig,
        limiter: Arc<UpstreamRateLimiter>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            upstream,
            client: InstrumentedHttpClient::wrap(client),
            breaker: CircuitBreaker::new(breaker),
            limiter,
            retry,
            timeout_ms: 10_000,
        }
    }

    pub fn from_policy(policy: &UpstreamPolicy, client: Arc<dyn HttpClient>) -> Self {
        Self::new(
            policy.upstream,
            client,
            policy.breaker,
            Arc::new(UpstreamRateLimiter::new(policy.qps)),
            policy.retry.clone(),
        )
        .with_timeout_ms(policy.timeout_ms())
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub const fn upstream(&self) -> UpstreamId {
        self.upstream
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn breaker_snapshot(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    pub fn limiter(&self) -> &Arc<UpstreamRateLimiter> {
        &self.limiter
    }

    /// Performs `request`, returning the first 2xx response.
    pub async fn invoke(&self, request: HttpRequest) -> Result<HttpResponse, UpstreamError> {
        self.invoke_with(request, Ok).await
    }

    /// Performs `request` and decodes a 2xx body as JSON.
    ///
    /// A 2xx whose body cannot be decoded counts as a breaker failure and is retried
    /// like a transient error.
    pub async fn invoke_json<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
    ) -> Result<T, UpstreamError> {
        self.invoke_with(request, |response| {
            response
                .json::<T>()
                .map_err(|error| format!("invalid JSON body: {error}"))
        })
        .await
    }

    async fn invoke_with<T, F>(&self, request: HttpRequest, mut decode: F) -> Result<T, UpstreamError>
    where
        F: FnMut(HttpResponse) -> Result<T, String>,
    {
        if !self.breaker.allow_request() {
            tracing::debug!(upstream = %self.upstream, "breaker open; call rejected");
            return Err(UpstreamError::breaker_open(self.upstream));
        }

        let request = request.with_timeout_ms(self.timeout_ms);
        let attempts = self.retry.total_attempts();
        let mut last_error = UpstreamError::upstream(self.upstream, "no attempt was made");

        for attempt in 0..attempts {
            self.limiter.acquire().await;
            tracing::debug!(
                upstream = %self.upstream,
                url = %request.url,
                attempt = attempt + 1,
                attempts,
                "calling upstream"
            );

            let failure = match self.client.execute(request.clone()).await {
                Ok(response) if response.is_success() => match decode(response) {
                    Ok(value) => {
                        self.breaker.record_success();
                        return Ok(value);
                    }
                    Err(message) => UpstreamError::upstream(self.upstream, message),
                },
                Ok(response) if self.retry.should_retry_status(response.status) => {
                    UpstreamError::status(self.upstream, response.status)
                }
                Ok(response) => {
                    tracing::debug!(
                        upstream = %self.upstream,
                        status = response.status,
                        "non-retryable upstream status"
                    );
                    return Err(UpstreamError::status(self.upstream, response.status));
                }
                Err(error) if !error.retryable() => {
                    self.breaker.record_failure();
                    return Err(UpstreamError::upstream(self.upstream, error.message()));
                }
                Err(error) => UpstreamError::upstream(self.upstream, error.message()),
            };

            self.breaker.record_failure();
            last_error = failure;

            if attempt + 1 < attempts {
                let delay = self.retry.delay_for_attempt(attempt);
                tracing::debug!(
                    upstream = %self.upstream,
                    error = %last_error,
                    delay_ms = delay.as_millis() as u64,
                    "retrying upstream call"
                );
                tokio::time::sleep(delay).await;
            }
        }

        tracing::warn!(
            upstream = %self.upstream,
            attempts,
            error = %last_error,
            "upstream retries exhausted"
        );
        Err(last_error)
    }
}

impl std::fmt::Debug for UpstreamInvoker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamInvoker")
            .field("upstream", &self.upstream)
            .field("breaker", &self.breaker.snapshot())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::http_client::testing::ScriptedHttpClient;
    use crate::http_client::HttpError;
    use crate::retry::Backoff;

    fn invoker(
        client: Arc<ScriptedHttpClient>,
        max_retries: u32,
        threshold: u32,
    ) -> UpstreamInvoker {
        UpstreamInvoker::new(
            UpstreamId::Nominatim,
            client,
            CircuitBreakerConfig {
                failure_threshold: threshold,
                window: Duration::from_secs(10),
                reset_timeout: Duration::from_secs(30),
            },
            Arc::new(UpstreamRateLimiter::unlimited()),
            RetryConfig::new(
                max_retries,
                Backoff::exponential(Duration::from_millis(1), Duration::from_millis(5)),
            ),
        )
    }

    #[tokio::test]
    async fn retries_429_then_returns_success() {
        let client = Arc::new(ScriptedHttpClient::new(vec![
            Ok(HttpResponse::new(429, "slow down")),
            Ok(HttpResponse::ok_json("[]")),
        ]));
        let invoker = invoker(client.clone(), 2, 5);

        let response = invoker
            .invoke(HttpRequest::get("https://example.test/search"))
            .await
            .expect("second attempt succeeds");

        assert_eq!(response.status, 200);
        assert_eq!(client.call_count(), 2);
        let snapshot = invoker.breaker_snapshot();
        assert_eq!(snapshot.total_failures, 1);
        assert_eq!(snapshot.total_successes, 1);
        assert_eq!(snapshot.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_network_call() {
        let client = Arc::new(ScriptedHttpClient::new(vec![
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::ok_json("[]")),
        ]));
        let invoker = invoker(client.clone(), 0, 1);

        let first = invoker
            .invoke(HttpRequest::get("https://example.test/search"))
            .await
            .expect_err("503 fails");
        assert_eq!(first.kind(), UpstreamErrorKind::Upstream);
        assert_eq!(first.upstream_status(), Some(503));

        let second = invoker
            .invoke(HttpRequest::get("https://example.test/search"))
            .await
            .expect_err("breaker is open");

        assert_eq!(second.kind(), UpstreamErrorKind::BreakerOpen);
        assert_eq!(second.http_status(), 503);
        assert_eq!(second.code(), "upstream.breaker_open");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried_or_counted() {
        let client = Arc::new(ScriptedHttpClient::new(vec![Ok(HttpResponse::new(404, ""))]));
        let invoker = invoker(client.clone(), 2, 5);

        let error = invoker
            .invoke(HttpRequest::get("https://example.test/reverse"))
            .await
            .expect_err("404 is final");

        assert_eq!(error.upstream_status(), Some(404));
        assert_eq!(error.http_status(), 502);
        assert_eq!(client.call_count(), 1);
        assert_eq!(invoker.breaker_snapshot().total_failures, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_last_failure() {
        let client = Arc::new(ScriptedHttpClient::new(vec![
            Err(HttpError::new("connection reset")),
            Ok(HttpResponse::new(500, "")),
            Ok(HttpResponse::new(502, "")),
        ]));
        let invoker = invoker(client.clone(), 2, 10);

        let error = invoker
            .invoke(HttpRequest::get("https://example.test/search"))
            .await
            .expect_err("all attempts fail");

        assert_eq!(error.kind(), UpstreamErrorKind::Upstream);
        assert_eq!(error.upstream_status(), Some(502));
        assert_eq!(error.code(), "upstream.error");
        assert_eq!(client.call_count(), 3);
        assert_eq!(invoker.breaker().recent_failures(), 3);
    }

    #[tokio::test]
    async fn non_retryable_transport_error_stops_immediately() {
        let client = Arc::new(ScriptedHttpClient::new(vec![Err(HttpError::non_retryable(
            "invalid request: relative URL",
        ))]));
        let invoker = invoker(client.clone(), 2, 5);

        let error = invoker
            .invoke(HttpRequest::get("not a url"))
            .await
            .expect_err("builder errors are final");

        assert_eq!(error.message(), "invalid request: relative URL");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn undecodable_success_is_retried_as_failure() {
        let client = Arc::new(ScriptedHttpClient::new(vec![
            Ok(HttpResponse::ok_json("<html>")),
            Ok(HttpResponse::ok_json("[]")),
        ]));
        let invoker = invoker(client.clone(), 2, 5);

        let value = invoker
            .invoke_json::<serde_json::Value>(HttpRequest::get("https://example.test/search"))
            .await
            .expect("second body decodes");

        assert_eq!(value, serde_json::json!([]));
        assert_eq!(client.call_count(), 2);
        assert_eq!(invoker.breaker_snapshot().total_failures, 1);
        assert_eq!(invoker.breaker_snapshot().total_successes, 1);
    }

    #[tokio::test]
    async fn undecodable_bodies_exhaust_retries() {
        let client = Arc::new(ScriptedHttpClient::new(vec![
            Ok(HttpResponse::ok_json("<html>")),
            Ok(HttpResponse::ok_json("<html>")),
        ]));
        let invoker = invoker(client.clone(), 1, 5);

        let error = invoker
            .invoke_json::<serde_json::Value>(HttpRequest::get("https://example.test/search"))
            .await
            .expect_err("no body decodes");

        assert_eq!(error.kind(), UpstreamErrorKind::Upstream);
        assert!(error.message().starts_with("invalid JSON body"));
        assert_eq!(client.call_count(), 2);
        assert_eq!(invoker.breaker_snapshot().total_failures, 2);
    }

    #[tokio::test]
    async fn policy_timeout_is_applied_to_requests() {
        let client = Arc::new(ScriptedHttpClient::new(vec![Ok(HttpResponse::ok_json("{}"))]));
        let policy = UpstreamPolicy {
            qps: 1000.0,
            timeout: Duration::from_millis(2500),
            ..UpstreamPolicy::open_meteo_default()
        };
        let invoker = UpstreamInvoker::from_policy(&policy, client.clone());

        invoker
            .invoke(HttpRequest::get("https://example.test/v1/forecast"))
            .await
            .expect("success");

        assert_eq!(invoker.upstream(), UpstreamId::OpenMeteo);
        assert_eq!(client.recorded_requests()[0].timeout_ms, 2500);
    }
}
