//! Open-Meteo forecast API: hourly series and recent daily summaries.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;

use super::coerce_f64;
use crate::cache::{CacheStore, TtlCache};
use crate::circuit_breaker::CircuitSnapshot;
use crate::http_client::{HttpClient, HttpRequest};
use crate::invoker::{UpstreamError, UpstreamInvoker};
use crate::policy::UpstreamPolicy;
use crate::{Coordinates, CoreError, ResponseSource, Timezone, UpstreamId, ValidationError};

pub const DEFAULT_OPEN_METEO_BASE: &str = "https://api.open-meteo.com";
pub const DEFAULT_OPEN_METEO_USER_AGENT: &str = concat!("skycast/", env!("CARGO_PKG_VERSION"));

/// Lookback bounds accepted by the `past_days` parameter.
pub const MIN_PAST_DAYS: u32 = 1;
pub const MAX_PAST_DAYS: u32 = 92;

pub const DAILY_FIELDS: &str = "temperature_2m_max,temperature_2m_min,precipitation_sum";
pub const HOURLY_FIELDS: &str = "temperature_2m,precipitation";

/// Weather client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherConfig {
    pub base_url: String,
    pub user_agent: String,
    pub policy: UpstreamPolicy,
    pub hourly_cache_ttl: Duration,
    pub daily_cache_ttl: Duration,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: String::from(DEFAULT_OPEN_METEO_BASE),
            user_agent: String::from(DEFAULT_OPEN_METEO_USER_AGENT),
            policy: UpstreamPolicy::open_meteo_default(),
            hourly_cache_ttl: Duration::from_secs(300),
            daily_cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Clamps a requested lookback to what the provider serves.
pub fn clamp_past_days(days: i64) -> u32 {
    days.clamp(i64::from(MIN_PAST_DAYS), i64::from(MAX_PAST_DAYS)) as u32
}

pub fn daily_cache_key(coordinates: Coordinates, timezone: &Timezone, past_days: u32) -> String {
    format!(
        "daily:{:.4}:{:.4}:{}:{past_days}",
        coordinates.latitude(),
        coordinates.longitude(),
        timezone
    )
}

/// Daily summary arrays, aligned index by index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySeries {
    pub time: Vec<String>,
    pub tmax: Vec<Option<f64>>,
    pub tmin: Vec<Option<f64>>,
    pub precip: Vec<Option<f64>>,
}

/// Recent-days summary for one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentDaily {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub days: u32,
    pub daily: DailySeries,
    pub source: ResponseSource,
}

/// Validated hourly fetch parameters. The date range is inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyRequest {
    coordinates: Coordinates,
    start: Date,
    end: Date,
    timezone: Timezone,
}

impl HourlyRequest {
    pub fn new(
        coordinates: Coordinates,
        start: Date,
        end: Date,
        timezone: Timezone,
    ) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::InvertedDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self {
            coordinates,
            start,
            end,
            timezone,
        })
    }

    pub const fn coordinates(&self) -> Coordinates {
        self.coordinates
    }

    pub const fn start(&self) -> Date {
        self.start
    }

    pub const fn end(&self) -> Date {
        self.end
    }

    pub fn timezone(&self) -> &Timezone {
        &self.timezone
    }

    pub fn cache_key(&self) -> String {
        format!(
            "{:.4}:{:.4}:{}:{}:{HOURLY_FIELDS}:{}",
            self.coordinates.latitude(),
            self.coordinates.longitude(),
            self.start,
            self.end,
            self.timezone
        )
    }
}

/// Hourly temperature and precipitation, aligned index by index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlySeries {
    /// Local ISO-8601 timestamps without offset, e.g. `2025-01-01T13:00`.
    pub times: Vec<String>,
    pub temperature_2m: Vec<Option<f64>>,
    pub precipitation: Vec<Option<f64>>,
    #[serde(default)]
    pub utc_offset_seconds: i32,
}

impl HourlySeries {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Writes the series as JSON, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reads a series saved by [`HourlySeries::save_to_file`]; `None` when the file
    /// does not exist.
    pub fn load_from_file(path: &Path) -> Result<Option<Self>, CoreError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Parses a forecast payload's `hourly` block.
///
/// Missing or null fields become empty and the three series are truncated to their
/// shortest common length.
pub fn parse_hourly(payload: &Value) -> HourlySeries {
    let hourly = payload.get("hourly");
    let mut times = string_array(hourly.and_then(|block| block.get("time")));
    let mut temperature_2m = number_array(hourly.and_then(|block| block.get("temperature_2m")));
    let mut precipitation = number_array(hourly.and_then(|block| block.get("precipitation")));

    let len = times.len().min(temperature_2m.len()).min(precipitation.len());
    times.truncate(len);
    temperature_2m.truncate(len);
    precipitation.truncate(len);

    HourlySeries {
        times,
        temperature_2m,
        precipitation,
        utc_offset_seconds: payload
            .get("utc_offset_seconds")
            .and_then(Value::as_i64)
            .and_then(|offset| i32::try_from(offset).ok())
            .unwrap_or(0),
    }
}

/// Parses a forecast payload's `daily` block with the same rules as [`parse_hourly`].
pub fn parse_daily(payload: &Value) -> DailySeries {
    let daily = payload.get("daily");
    let mut time = string_array(daily.and_then(|block| block.get("time")));
    let mut tmax = number_array(daily.and_then(|block| block.get("temperature_2m_max")));
    let mut tmin = number_array(daily.and_then(|block| block.get("temperature_2m_min")));
    let mut precip = number_array(daily.and_then(|block| block.get("precipitation_sum")));

    let len = time
        .len()
        .min(tmax.len())
        .min(tmin.len())
        .min(precip.len());
    time.truncate(len);
    tmax.truncate(len);
    tmin.truncate(len);
    precip.truncate(len);

    DailySeries {
        time,
        tmax,
        tmin,
        precip,
    }
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn number_array(value: Option<&Value>) -> Vec<Option<f64>> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().map(coerce_f64).collect())
        .unwrap_or_default()
}

/// Open-Meteo client with independent TTL caches for hourly and daily data.
#[derive(Debug)]
pub struct WeatherClient {
    forecast_url: String,
    user_agent: String,
    invoker: UpstreamInvoker,
    hourly_cache: CacheStore<TtlCache<HourlySeries>>,
    daily_cache: CacheStore<TtlCache<RecentDaily>>,
}

impl WeatherClient {
    pub fn new(config: WeatherConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            forecast_url: format!("{}/v1/forecast", config.base_url.trim_end_matches('/')),
            user_agent: config.user_agent,
            invoker: UpstreamInvoker::from_policy(&config.policy, http_client),
            hourly_cache: CacheStore::new(TtlCache::new(config.hourly_cache_ttl)),
            daily_cache: CacheStore::new(TtlCache::new(config.daily_cache_ttl)),
        }
    }

    pub fn breaker_snapshot(&self) -> CircuitSnapshot {
        self.invoker.breaker_snapshot()
    }

    /// Daily max/min temperature and precipitation for the last `days` days,
    /// with `days` clamped to the provider's lookback range.
    pub async fn recent_daily(
        &self,
        coordinates: Coordinates,
        timezone: &Timezone,
        days: i64,
    ) -> Result<RecentDaily, UpstreamError> {
        let past_days = clamp_past_days(days);
        let key = daily_cache_key(coordinates, timezone, past_days);
        if let Some(cached) = self.daily_cache.get::<RecentDaily>(&key) {
            tracing::debug!(key = %key, "daily forecast cache hit");
            return Ok(RecentDaily {
                source: ResponseSource::Cache,
                ..cached
            });
        }

        let request = self
            .request(coordinates)
            .with_query("daily", DAILY_FIELDS)
            .with_query("timezone", timezone.as_str())
            .with_query("past_days", past_days);
        let payload = self.fetch_object(request).await?;

        let recent = RecentDaily {
            latitude: coordinates.latitude(),
            longitude: coordinates.longitude(),
            timezone: timezone.as_str().to_owned(),
            days: past_days,
            daily: parse_daily(&payload),
            source: ResponseSource::Live,
        };
        self.daily_cache.set(key, recent.clone());
        Ok(recent)
    }

    pub async fn hourly(&self, request: &HourlyRequest) -> Result<HourlySeries, UpstreamError> {
        let key = request.cache_key();
        if let Some(cached) = self.hourly_cache.get::<HourlySeries>(&key) {
            tracing::debug!(key = %key, "hourly forecast cache hit");
            return Ok(cached);
        }

        let http_request = self
            .request(request.coordinates())
            .with_query("start_date", request.start())
            .with_query("end_date", request.end())
            .with_query("hourly", HOURLY_FIELDS)
            .with_query("timezone", request.timezone().as_str());
        let payload = self.fetch_object(http_request).await?;

        let series = parse_hourly(&payload);
        self.hourly_cache.set(key, series.clone());
        Ok(series)
    }

    async fn fetch_object(&self, request: HttpRequest) -> Result<Value, UpstreamError> {
        let payload = self.invoker.invoke_json::<Value>(request).await?;
        if !payload.is_object() {
            return Err(UpstreamError::unexpected_shape(
                UpstreamId::OpenMeteo,
                "unexpected response from open-meteo: expected an object",
            ));
        }
        Ok(payload)
    }

    fn request(&self, coordinates: Coordinates) -> HttpRequest {
        HttpRequest::get(self.forecast_url.as_str())
            .with_header("user-agent", self.user_agent.as_str())
            .with_query("latitude", coordinates.latitude())
            .with_query("longitude", coordinates.longitude())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::date;

    use super::*;
    use crate::http_client::testing::ScriptedHttpClient;
    use crate::http_client::HttpResponse;

    fn client(
        script: Vec<Result<HttpResponse, crate::HttpError>>,
    ) -> (WeatherClient, Arc<ScriptedHttpClient>) {
        let scripted = Arc::new(ScriptedHttpClient::new(script));
        let config = WeatherConfig {
            base_url: String::from("https://meteo.test"),
            policy: UpstreamPolicy {
                qps: 1000.0,
                ..UpstreamPolicy::open_meteo_default()
            },
            ..WeatherConfig::default()
        };
        (WeatherClient::new(config, scripted.clone()), scripted)
    }

    fn tokyo() -> Coordinates {
        Coordinates::new(35.6812, 139.7671).expect("valid")
    }

    #[test]
    fn past_days_are_clamped_to_provider_range() {
        assert_eq!(clamp_past_days(0), 1);
        assert_eq!(clamp_past_days(-5), 1);
        assert_eq!(clamp_past_days(14), 14);
        assert_eq!(clamp_past_days(92), 92);
        assert_eq!(clamp_past_days(365), 92);
    }

    #[test]
    fn hourly_parse_truncates_to_shortest_series() {
        let payload = json!({
            "utc_offset_seconds": 32400,
            "hourly": {
                "time": ["2025-01-01T00:00", "2025-01-01T01:00", "2025-01-01T02:00"],
                "temperature_2m": [5.1, null, 4.8],
                "precipitation": [0.0, 0.2]
            }
        });

        let series = parse_hourly(&payload);

        assert_eq!(series.len(), 2);
        assert_eq!(series.temperature_2m, vec![Some(5.1), None]);
        assert_eq!(series.precipitation, vec![Some(0.0), Some(0.2)]);
        assert_eq!(series.utc_offset_seconds, 32400);
    }

    #[test]
    fn null_blocks_become_empty_series() {
        let series = parse_hourly(&json!({ "hourly": { "time": null } }));
        assert!(series.is_empty());

        let daily = parse_daily(&json!({ "daily": null }));
        assert_eq!(daily, DailySeries::default());
    }

    #[test]
    fn hourly_request_rejects_inverted_range() {
        let error = HourlyRequest::new(
            tokyo(),
            date!(2025 - 01 - 02),
            date!(2025 - 01 - 01),
            Timezone::default(),
        )
        .expect_err("end before start");

        assert!(matches!(error, ValidationError::InvertedDateRange { .. }));
    }

    #[test]
    fn cache_keys_round_coordinates_to_four_decimals() {
        let coordinates = Coordinates::new(35.681236, 139.767125).expect("valid");
        let request = HourlyRequest::new(
            coordinates,
            date!(2025 - 01 - 01),
            date!(2025 - 01 - 02),
            Timezone::default(),
        )
        .expect("valid");

        assert_eq!(
            request.cache_key(),
            "35.6812:139.7671:2025-01-01:2025-01-02:temperature_2m,precipitation:Asia/Tokyo"
        );
        assert_eq!(
            daily_cache_key(coordinates, &Timezone::default(), 14),
            "daily:35.6812:139.7671:Asia/Tokyo:14"
        );
    }

    #[tokio::test]
    async fn recent_daily_clamps_lookback_and_caches() {
        let body = json!({
            "daily": {
                "time": ["2025-01-01", "2025-01-02"],
                "temperature_2m_max": [10.0, 11.0],
                "temperature_2m_min": [1.0, 2.0],
                "precipitation_sum": [0.0, null]
            }
        });
        let (client, scripted) = client(vec![Ok(HttpResponse::ok_json(body.to_string()))]);

        let live = client
            .recent_daily(tokyo(), &Timezone::default(), 400)
            .await
            .expect("daily fetch");
        let cached = client
            .recent_daily(tokyo(), &Timezone::default(), 92)
            .await
            .expect("daily cache hit");

        assert_eq!(live.days, 92);
        assert_eq!(live.source, ResponseSource::Live);
        assert_eq!(live.daily.precip, vec![Some(0.0), None]);
        assert_eq!(cached.source, ResponseSource::Cache);
        assert_eq!(cached.daily, live.daily);
        assert_eq!(scripted.call_count(), 1);

        let sent = &scripted.recorded_requests()[0];
        assert_eq!(sent.url, "https://meteo.test/v1/forecast");
        assert_eq!(sent.query_value("past_days"), Some("92"));
        assert_eq!(sent.query_value("daily"), Some(DAILY_FIELDS));
        assert_eq!(sent.query_value("timezone"), Some("Asia/Tokyo"));
    }

    #[tokio::test]
    async fn hourly_sends_date_range_and_shares_cache_key() {
        let body = json!({
            "hourly": {
                "time": ["2025-01-01T00:00"],
                "temperature_2m": [3.5],
                "precipitation": [0.1]
            }
        });
        let (client, scripted) = client(vec![Ok(HttpResponse::ok_json(body.to_string()))]);
        let request = HourlyRequest::new(
            tokyo(),
            date!(2025 - 01 - 01),
            date!(2025 - 01 - 02),
            Timezone::default(),
        )
        .expect("valid");

        let first = client.hourly(&request).await.expect("hourly fetch");
        let second = client.hourly(&request).await.expect("hourly cache hit");

        assert_eq!(first, second);
        assert_eq!(scripted.call_count(), 1);
        let sent = &scripted.recorded_requests()[0];
        assert_eq!(sent.query_value("start_date"), Some("2025-01-01"));
        assert_eq!(sent.query_value("end_date"), Some("2025-01-02"));
        assert_eq!(sent.query_value("hourly"), Some(HOURLY_FIELDS));
    }

    #[tokio::test]
    async fn non_object_payload_is_unexpected_shape() {
        let (client, _) = client(vec![Ok(HttpResponse::ok_json("[1, 2]"))]);

        let error = client
            .recent_daily(tokyo(), &Timezone::default(), 7)
            .await
            .expect_err("array payload");

        assert_eq!(error.code(), "upstream.unexpected_shape");
    }

    #[test]
    fn series_file_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("series.json");

        assert_eq!(HourlySeries::load_from_file(&path).expect("missing is ok"), None);

        let series = HourlySeries {
            times: vec![String::from("2025-01-01T00:00")],
            temperature_2m: vec![Some(1.5)],
            precipitation: vec![None],
            utc_offset_seconds: 3600,
        };
        series.save_to_file(&path).expect("save");

        let loaded = HourlySeries::load_from_file(&path)
            .expect("load")
            .expect("file exists");
        assert_eq!(loaded, series);
    }
}
