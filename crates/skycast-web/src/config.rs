//! Server configuration.
//!
//! Every option is both a command-line flag and an environment variable.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BIND_ADDR` | `0.0.0.0:8000` | Listen address |
//! | `LOG_FORMAT` | `pretty` | `pretty` or `json` log lines |
//! | `LOG_ROUTES` | off | Log the route table at startup |
//! | `ALLOW_ORIGINS` | `http://localhost:3000` | Comma separated CORS origins |
//! | `NOMINATIM_BASE` | `https://nominatim.openstreetmap.org` | Geocoding base URL |
//! | `NOMINATIM_UA` | `skycast/<version> (contact: ...)` | Geocoding `User-Agent` |
//! | `NOMINATIM_QPS` | `1.0` | Geocoding requests per second (min 0.1) |
//! | `HTTP_RETRY_MAX` | `2` | Geocoding retries |
//! | `HTTP_RETRY_BACKOFF_S` | `0.3` | Geocoding backoff base |
//! | `CB_OPEN_THRESHOLD` | `5` | Failures that open the geocoding breaker |
//! | `CB_OPEN_WINDOW_S` | `10` | Breaker observation window |
//! | `CB_RESET_TIMEOUT_S` | `30` | Open to half-open delay |
//! | `GEOCODE_CACHE_MAX` | `200` | Geocoding cache entries |
//! | `GEOCODE_CACHE_TTL` | `600` | Geocoding cache TTL (s) |
//! | `OPEN_METEO_BASE` | `https://api.open-meteo.com` | Weather base URL |
//! | `OPEN_METEO_UA` | `skycast/<version>` | Weather `User-Agent` |
//! | `OPEN_METEO_QPS` | `10` | Weather requests per second |
//! | `OPEN_METEO_RETRY_MAX` | `2` | Weather retries |
//! | `OPEN_METEO_RETRY_BACKOFF_S` | `0.5` | Weather backoff base |
//! | `OPEN_METEO_CACHE_TTL` | `300` | Hourly cache TTL (s) |
//! | `OPEN_METEO_DAILY_CACHE_TTL` | `300` | Daily cache TTL (s) |
//! | `RATE_LIMIT_PER_MIN` | `30` | Per-IP requests per minute |
//! | `RATE_LIMIT_BURST` | per-minute value | Per-IP burst |
//! | `RATE_LIMIT_PATH_PREFIX` | `/api/` | Paths subject to the per-IP limit |
//! | `RATE_LIMIT_BEHIND_PROXY` | off | Trust `X-Forwarded-For` |
//! | `MODEL_PATH` | unset | Saved regression model; persistence when unset |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::builder::FalseyValueParser;
use clap::{Parser, ValueEnum};
use skycast_core::adapters::nominatim::{DEFAULT_NOMINATIM_BASE, DEFAULT_NOMINATIM_USER_AGENT};
use skycast_core::adapters::open_meteo::{DEFAULT_OPEN_METEO_BASE, DEFAULT_OPEN_METEO_USER_AGENT};
use skycast_core::{
    Backoff, CircuitBreakerConfig, GeocodingConfig, RetryConfig, UpstreamPolicy, WeatherConfig,
};

use crate::middleware::rate_limit::IpRateLimitConfig;

/// Backoff never grows past this, for either upstream.
const BACKOFF_CAP: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// 🌤️ skycast - next-day weather forecast API
#[derive(Debug, Clone, Parser)]
#[command(name = "skycast", version, about = "Weather forecast API with resilient upstream access")]
pub struct ServerConfig {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[arg(long, env = "LOG_ROUTES", value_parser = FalseyValueParser::new())]
    pub log_routes: bool,

    #[arg(
        long,
        env = "ALLOW_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000"
    )]
    pub allow_origins: Vec<String>,

    #[arg(long, env = "NOMINATIM_BASE", default_value = DEFAULT_NOMINATIM_BASE)]
    pub nominatim_base: String,

    #[arg(long, env = "NOMINATIM_UA", default_value = DEFAULT_NOMINATIM_USER_AGENT)]
    pub nominatim_ua: String,

    #[arg(long, env = "NOMINATIM_QPS", default_value_t = 1.0)]
    pub nominatim_qps: f64,

    #[arg(long, env = "HTTP_RETRY_MAX", default_value_t = 2)]
    pub http_retry_max: u32,

    #[arg(long, env = "HTTP_RETRY_BACKOFF_S", default_value_t = 0.3)]
    pub http_retry_backoff_s: f64,

    #[arg(long, env = "CB_OPEN_THRESHOLD", default_value_t = 5)]
    pub cb_open_threshold: u32,

    #[arg(long, env = "CB_OPEN_WINDOW_S", default_value_t = 10.0)]
    pub cb_open_window_s: f64,

    #[arg(long, env = "CB_RESET_TIMEOUT_S", default_value_t = 30.0)]
    pub cb_reset_timeout_s: f64,

    #[arg(long, env = "GEOCODE_CACHE_MAX", default_value_t = 200)]
    pub geocode_cache_max: usize,

    #[arg(long, env = "GEOCODE_CACHE_TTL", default_value_t = 600.0)]
    pub geocode_cache_ttl: f64,

    #[arg(long, env = "OPEN_METEO_BASE", default_value = DEFAULT_OPEN_METEO_BASE)]
    pub open_meteo_base: String,

    #[arg(long, env = "OPEN_METEO_UA", default_value = DEFAULT_OPEN_METEO_USER_AGENT)]
    pub open_meteo_ua: String,

    #[arg(long, env = "OPEN_METEO_QPS", default_value_t = 10.0)]
    pub open_meteo_qps: f64,

    #[arg(long, env = "OPEN_METEO_RETRY_MAX", default_value_t = 2)]
    pub open_meteo_retry_max: u32,

    #[arg(long, env = "OPEN_METEO_RETRY_BACKOFF_S", default_value_t = 0.5)]
    pub open_meteo_retry_backoff_s: f64,

    #[arg(long, env = "OPEN_METEO_CACHE_TTL", default_value_t = 300.0)]
    pub open_meteo_cache_ttl: f64,

    #[arg(long, env = "OPEN_METEO_DAILY_CACHE_TTL", default_value_t = 300.0)]
    pub open_meteo_daily_cache_ttl: f64,

    #[arg(long, env = "RATE_LIMIT_PER_MIN", default_value_t = 30)]
    pub rate_limit_per_min: u32,

    /// Defaults to the per-minute value.
    #[arg(long, env = "RATE_LIMIT_BURST")]
    pub rate_limit_burst: Option<u32>,

    #[arg(long, env = "RATE_LIMIT_PATH_PREFIX", default_value = "/api/")]
    pub rate_limit_path_prefix: String,

    #[arg(long, env = "RATE_LIMIT_BEHIND_PROXY", value_parser = FalseyValueParser::new())]
    pub rate_limit_behind_proxy: bool,

    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn allowed_origins(&self) -> Vec<String> {
        self.allow_origins
            .iter()
            .map(|origin| origin.trim().to_owned())
            .filter(|origin| !origin.is_empty())
            .collect()
    }

    pub fn geocoding_config(&self) -> GeocodingConfig {
        GeocodingConfig {
            base_url: self.nominatim_base.clone(),
            user_agent: self.nominatim_ua.clone(),
            policy: UpstreamPolicy {
                qps: self.nominatim_qps,
                retry: RetryConfig::new(
                    self.http_retry_max,
                    Backoff::exponential(seconds(self.http_retry_backoff_s), BACKOFF_CAP),
                ),
                breaker: CircuitBreakerConfig {
                    failure_threshold: self.cb_open_threshold,
                    window: seconds(self.cb_open_window_s),
                    reset_timeout: seconds(self.cb_reset_timeout_s),
                },
                ..UpstreamPolicy::nominatim_default()
            },
            cache_ttl: seconds(self.geocode_cache_ttl),
            cache_max_entries: self.geocode_cache_max,
        }
    }

    pub fn weather_config(&self) -> WeatherConfig {
        WeatherConfig {
            base_url: self.open_meteo_base.clone(),
            user_agent: self.open_meteo_ua.clone(),
            policy: UpstreamPolicy {
                qps: self.open_meteo_qps,
                retry: RetryConfig::new(
                    self.open_meteo_retry_max,
                    Backoff::exponential(seconds(self.open_meteo_retry_backoff_s), BACKOFF_CAP),
                ),
                ..UpstreamPolicy::open_meteo_default()
            },
            hourly_cache_ttl: seconds(self.open_meteo_cache_ttl),
            daily_cache_ttl: seconds(self.open_meteo_daily_cache_ttl),
        }
    }

    pub fn rate_limit_config(&self) -> IpRateLimitConfig {
        IpRateLimitConfig {
            per_minute: self.rate_limit_per_min,
            burst: self.rate_limit_burst.unwrap_or(self.rate_limit_per_min),
            path_prefix: self.rate_limit_path_prefix.clone(),
            behind_proxy: self.rate_limit_behind_proxy,
        }
    }
}

/// Negative or non-finite values become zero.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}
