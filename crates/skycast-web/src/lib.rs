//! # Skycast Web
//!
//! HTTP boundary for the skycast forecast API.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Flags and environment variables |
//! | [`error`] | API error responses and startup errors |
//! | [`middleware`] | Request observability and per-IP rate limiting |
//! | [`routes`] | Route handlers |
//! | [`state`] | Shared application state |

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{LogFormat, ServerConfig};
pub use error::{ApiError, StartupError};
pub use state::AppState;

/// Full application router.
///
/// Layer order, outermost first: tracing, request observability, CORS, per-IP limit.
/// Rate-limited responses therefore still get a request id and count in metrics.
pub fn app(state: AppState, allowed_origins: &[String]) -> Router {
    routes::router()
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::limit_per_ip,
        ))
        .layer(cors_layer(allowed_origins))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::observe_request,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the configured origins. Unparseable origins are skipped.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .expose_headers([
            HeaderName::from_static(middleware::REQUEST_ID_HEADER),
            HeaderName::from_static(middleware::SERVER_TIMING_HEADER),
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
        ])
}
