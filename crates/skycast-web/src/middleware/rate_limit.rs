//! Per-client token bucket in front of the API routes.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::{Clock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

type KeyedRateLimiter =
    RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock, StateInformationMiddleware>;

/// Key used when the client address cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRateLimitConfig {
    pub per_minute: u32,
    pub burst: u32,
    /// Only paths starting with this prefix are limited.
    pub path_prefix: String,
    /// Trust the first `X-Forwarded-For` entry as the client address.
    pub behind_proxy: bool,
}

impl Default for IpRateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 30,
            burst: 30,
            path_prefix: String::from("/api/"),
            behind_proxy: false,
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

pub struct IpRateLimiter {
    config: IpRateLimitConfig,
    per_minute: NonZeroU32,
    limiter: KeyedRateLimiter,
    clock: DefaultClock,
}

impl IpRateLimiter {
    pub fn new(config: IpRateLimitConfig) -> Self {
        let per_minute = NonZeroU32::new(config.per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(per_minute);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);

        Self {
            config,
            per_minute,
            limiter: RateLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>(),
            clock: DefaultClock::default(),
        }
    }

    pub fn config(&self) -> &IpRateLimitConfig {
        &self.config
    }

    /// Requests per minute actually enforced, as reported in `X-RateLimit-Limit`.
    pub fn limit_per_minute(&self) -> u32 {
        self.per_minute.get()
    }

    /// Preflight requests and paths outside the prefix are never limited.
    pub fn applies_to(&self, method: &Method, path: &str) -> bool {
        method != Method::OPTIONS && path.starts_with(&self.config.path_prefix)
    }

    pub fn client_key(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> String {
        if self.config.behind_proxy {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            if let Some(client) = forwarded {
                return client.to_owned();
            }
        }
        peer.map_or_else(|| String::from(UNKNOWN_CLIENT), |ip| ip.to_string())
    }

    pub fn check(&self, key: &str) -> RateDecision {
        match self.limiter.check_key(&key.to_owned()) {
            Ok(snapshot) => RateDecision::Allowed {
                remaining: snapshot.remaining_burst_capacity(),
            },
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                RateDecision::Limited {
                    retry_after_secs: wait.as_secs_f64().ceil().max(1.0) as u64,
                }
            }
        }
    }

    /// Drops buckets that have fully refilled.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

impl std::fmt::Debug for IpRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpRateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

pub async fn limit_per_ip(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let limiter = &state.rate_limiter;
    if !limiter.applies_to(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let key = limiter.client_key(request.headers(), peer);

    match limiter.check(&key) {
        RateDecision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.limit_per_minute()));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        RateDecision::Limited { retry_after_secs } => {
            debug!(client = %key, retry_after_secs, "per-ip rate limit exceeded");
            ApiError::RateLimited {
                limit: limiter.limit_per_minute(),
                retry_after_secs,
            }
            .into_response()
        }
    }
}
