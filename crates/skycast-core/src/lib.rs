//! # Skycast Core
//!
//! Resilient upstream access and request observability for the skycast forecast API.
//!
//! ## Overview
//!
//! - **Upstream clients** for Nominatim geocoding and Open-Meteo weather data
//! - **Retrying invoker** composing a rate limiter, circuit breaker and backoff
//! - **TTL caches** in front of every upstream call
//! - **Request context** capturing every outbound call made while serving a request
//! - **Metrics registry** with rolling latency percentiles per route
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Nominatim and Open-Meteo clients |
//! | [`blocking`] | Synchronous weather client |
//! | [`cache`] | TTL and recency-bounded caches |
//! | [`circuit_breaker`] | Sliding-window circuit breaker |
//! | [`domain`] | Validated coordinates and timezone |
//! | [`error`] | Core error types |
//! | [`forecast`] | Next-day models over hourly series |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`invoker`] | Retrying upstream invoker and its errors |
//! | [`observability`] | Request context and metrics |
//! | [`policy`] | Per-upstream access policies |
//! | [`retry`] | Backoff and retry configuration |
//! | [`throttling`] | Process-wide upstream rate limiting |
//! | [`upstream`] | Upstream identifiers |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use skycast_core::{
//!     GeocodeSearchRequest, GeocodingClient, GeocodingConfig, ReqwestHttpClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = GeocodingClient::new(
//!         GeocodingConfig::default(),
//!         Arc::new(ReqwestHttpClient::new()),
//!     );
//!
//!     let request = GeocodeSearchRequest::new("Tokyo Station", 1, Some("jp"), "ja")?;
//!     let found = client.search(&request).await?;
//!     for place in &found.results {
//!         println!("{:?} {:?},{:?}", place.name, place.lat, place.lon);
//!     }
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod blocking;
pub mod cache;
pub mod circuit_breaker;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod http_client;
pub mod invoker;
pub mod observability;
pub mod policy;
pub mod retry;
pub mod throttling;
pub mod upstream;

pub use adapters::{
    coerce_f64, DailySeries, GeocodeReverse, GeocodeSearch, GeocodeSearchRequest,
    GeocodingClient, GeocodingConfig, HourlyRequest, HourlySeries, Place, RecentDaily,
    ReverseGeocodeRequest, WeatherClient, WeatherConfig,
};
pub use blocking::BlockingWeatherClient;
pub use cache::{Cache, CacheStore, LruTtlCache, TtlCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use domain::{Coordinates, Timezone};
pub use error::{CoreError, ValidationError};
pub use forecast::{
    local_today_and_tomorrow, DayBlock, DayStats, HourlyPoint, LinearModel, ModelArtifact,
    NextDayForecast, NextDayModel, PersistenceModel, RegressionModel,
};
pub use http_client::{
    HttpClient, HttpError, HttpFuture, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
};
pub use invoker::{UpstreamError, UpstreamErrorKind, UpstreamInvoker};
pub use observability::{
    CallLog, ExtCallRecord, InstrumentedHttpClient, MetricsRegistry, MetricsReport,
    MetricsSnapshot, RequestContext,
};
pub use policy::UpstreamPolicy;
pub use retry::{Backoff, RetryConfig};
pub use throttling::UpstreamRateLimiter;
pub use upstream::{ResponseSource, UpstreamId};
