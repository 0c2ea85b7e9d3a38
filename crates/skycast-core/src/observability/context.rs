//! Per-request identity and outbound-call capture.
//!
//! A [`RequestContext`] is created at the request boundary and bound to the handling
//! task with [`RequestContext::scope`]. Every call made through an
//! [`InstrumentedHttpClient`] while the scope is active appends one [`ExtCallRecord`]
//! to that request's call log, and to no other.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::http_client::{HttpClient, HttpError, HttpFuture, HttpRequest, HttpResponse};

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Immutable snapshot of the outbound calls captured so far.
pub type CallLog = Arc<[ExtCallRecord]>;

/// One outbound HTTP attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtCallRecord {
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub ok: Option<bool>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl ExtCallRecord {
    pub fn from_outcome(
        request: &HttpRequest,
        outcome: &Result<HttpResponse, HttpError>,
        started: Instant,
    ) -> Self {
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let (status, ok, error) = match outcome {
            Ok(response) => (
                Some(response.status),
                Some((200..400).contains(&response.status)),
                None,
            ),
            Err(error) => (None, Some(false), Some(error.message().to_owned())),
        };

        Self {
            method: request.method.as_str().to_owned(),
            url: request.full_url(),
            status,
            ok,
            duration_ms,
            error,
        }
    }
}

/// Request-scoped identity plus the accumulator of outbound calls.
///
/// Cloning shares the same accumulator; use [`RequestContext::begin`] for a new request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Arc<str>,
    calls: Arc<Mutex<CallLog>>,
}

impl RequestContext {
    /// Starts a new logical request with a fresh id and an empty call log.
    pub fn begin() -> Self {
        Self::with_request_id(Uuid::new_v4().to_string())
    }

    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        let request_id: String = request_id.into();
        Self {
            request_id: Arc::from(request_id),
            calls: Arc::new(Mutex::new(Arc::from(Vec::new()))),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Appends a record copy-on-write: snapshots handed out earlier never change.
    pub fn record_call(&self, record: ExtCallRecord) {
        let mut calls = self.lock_calls();
        let mut next = Vec::with_capacity(calls.len() + 1);
        next.extend(calls.iter().cloned());
        next.push(record);
        *calls = Arc::from(next);
    }

    /// Fixed snapshot of the calls recorded so far.
    pub fn current_calls(&self) -> CallLog {
        self.lock_calls().clone()
    }

    /// Runs `future` with this context as the task's current request.
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        REQUEST_CONTEXT.scope(self, future).await
    }

    /// The context bound to the current task, if any.
    pub fn current() -> Option<Self> {
        REQUEST_CONTEXT.try_with(Clone::clone).ok()
    }

    /// Records into the current task's context. Returns `false` outside any scope.
    pub fn record_in_current(record: ExtCallRecord) -> bool {
        REQUEST_CONTEXT
            .try_with(|context| context.record_call(record))
            .is_ok()
    }

    fn lock_calls(&self) -> MutexGuard<'_, CallLog> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Transport decorator capturing every attempt into the active [`RequestContext`].
pub struct InstrumentedHttpClient {
    inner: Arc<dyn HttpClient>,
}

impl InstrumentedHttpClient {
    /// Wraps `client` unless it is already instrumented, so wrapping twice never
    /// records a call twice.
    pub fn wrap(client: Arc<dyn HttpClient>) -> Arc<dyn HttpClient> {
        if client.is_instrumented() {
            return client;
        }
        Arc::new(Self { inner: client })
    }
}

impl HttpClient for InstrumentedHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let started = Instant::now();
            let outcome = self.inner.execute(request.clone()).await;
            let record = ExtCallRecord::from_outcome(&request, &outcome, started);

            if !RequestContext::record_in_current(record) {
                tracing::trace!(url = %request.url, "outbound call outside request context");
            }
            outcome
        })
    }

    fn is_instrumented(&self) -> bool {
        true
    }
}
