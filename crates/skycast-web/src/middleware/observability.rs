//! Request boundary: context, timing headers, metrics and the request summary line.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use skycast_core::RequestContext;
use tracing::{info, warn};

use crate::error::ErrorDetail;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const SERVER_TIMING_HEADER: &str = "server-timing";
/// Metrics key shared by every request that matched no route.
pub const UNMATCHED_ROUTE: &str = "<unmatched>";

/// Binds a fresh [`RequestContext`] for the lifetime of the request.
///
/// Metrics are keyed by the matched route template. Requests matching no route
/// share [`UNMATCHED_ROUTE`], so unknown paths do not grow the registry.
pub async fn observe_request(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let context = RequestContext::begin();
    let started = Instant::now();

    let method = request.method().to_string();
    let path = request.uri().path().to_owned();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_ROUTE.to_owned(), |matched| matched.as_str().to_owned());
    let query = request.uri().query().unwrap_or_default().to_owned();
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    let mut response = context.clone().scope(next.run(request)).await;

    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let status = response.status().as_u16();
    state.metrics.observe(&route, latency_ms, status >= 400);

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(context.request_id()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("app;dur={latency_ms}")) {
        headers.insert(SERVER_TIMING_HEADER, value);
    }

    let calls = context.current_calls();
    let ext_api_calls = match serde_json::to_string(&*calls) {
        Ok(encoded) => encoded,
        Err(error) => {
            warn!(%error, "failed to encode outbound call log");
            String::from("[]")
        }
    };
    let error = response
        .extensions()
        .get::<ErrorDetail>()
        .map(|detail| detail.0.as_str());

    info!(
        target: "request_summary",
        request_id = context.request_id(),
        method = %method,
        path = %path,
        query = %query,
        client = client.as_deref(),
        status,
        latency_ms,
        ext_api_calls_count = calls.len(),
        ext_api_calls = %ext_api_calls,
        error,
        "request_summary"
    );

    response
}
