//! HTTP routes.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Liveness |
//! | GET | `/api/health` | Liveness plus upstream breaker state |
//! | GET | `/api/geocode/search` | Forward geocoding |
//! | GET | `/api/geocode/reverse` | Reverse geocoding |
//! | GET | `/forecast` | Recent daily summary |
//! | GET, POST | `/predict` | Next-day forecast |
//! | GET | `/api/metrics-lite` | Request metrics |

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use skycast_core::forecast::points_on;
use skycast_core::{
    local_today_and_tomorrow, Coordinates, DayBlock, GeocodeReverse, GeocodeSearch,
    GeocodeSearchRequest, HourlyPoint, HourlyRequest, MetricsReport, RecentDaily,
    ReverseGeocodeRequest, Timezone,
};
use time::{Duration, OffsetDateTime};

use crate::error::ApiError;
use crate::state::AppState;

/// Route table, logged at startup when requested.
pub const ROUTES: &[(&str, &str)] = &[
    ("GET", "/health"),
    ("GET", "/api/health"),
    ("GET", "/api/geocode/search"),
    ("GET", "/api/geocode/reverse"),
    ("GET", "/forecast"),
    ("GET,POST", "/predict"),
    ("GET", "/api/metrics-lite"),
];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/health", get(api_health))
        .route("/api/geocode/search", get(geocode_search))
        .route("/api/geocode/reverse", get(geocode_reverse))
        .route("/forecast", get(forecast))
        .route("/predict", get(predict_query).post(predict_body))
        .route("/api/metrics-lite", get(metrics_lite))
}

fn default_limit() -> usize {
    5
}

fn default_lang() -> String {
    String::from("ja")
}

fn default_timezone() -> String {
    String::from(Timezone::DEFAULT)
}

fn default_days() -> i64 {
    14
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub countrycodes: Option<String>,
    #[serde(default = "default_lang")]
    pub lang: String,
}

#[derive(Debug, Deserialize)]
pub struct ReverseParams {
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_lang")]
    pub lang: String,
}

#[derive(Debug, Deserialize)]
pub struct ForecastParams {
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_timezone")]
    pub tz: String,
    #[serde(default = "default_days")]
    pub days: i64,
}

#[derive(Debug, Deserialize)]
pub struct PredictParams {
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_timezone")]
    pub tz: String,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub model: &'static str,
    pub d0: DayBlock,
    pub d1: DayBlock,
    pub forecast_series: Vec<HourlyPoint>,
    pub recent_actuals: Vec<HourlyPoint>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn api_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "upstreams": {
            "nominatim": state.geocoding.breaker_snapshot(),
            "open_meteo": state.weather.breaker_snapshot(),
        }
    }))
}

async fn geocode_search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<GeocodeSearch>, ApiError> {
    let Query(params) = params?;
    let request = GeocodeSearchRequest::new(
        &params.q,
        params.limit,
        params.countrycodes.as_deref(),
        &params.lang,
    )?;
    Ok(Json(state.geocoding.search(&request).await?))
}

async fn geocode_reverse(
    State(state): State<AppState>,
    params: Result<Query<ReverseParams>, QueryRejection>,
) -> Result<Json<GeocodeReverse>, ApiError> {
    let Query(params) = params?;
    let request =
        ReverseGeocodeRequest::new(Coordinates::new(params.lat, params.lon)?, &params.lang)?;
    Ok(Json(state.geocoding.reverse(&request).await?))
}

async fn forecast(
    State(state): State<AppState>,
    params: Result<Query<ForecastParams>, QueryRejection>,
) -> Result<Json<RecentDaily>, ApiError> {
    let Query(params) = params?;
    let coordinates = Coordinates::new(params.lat, params.lon)?;
    let timezone = Timezone::parse(&params.tz)?;
    Ok(Json(
        state
            .weather
            .recent_daily(coordinates, &timezone, params.days)
            .await?,
    ))
}

async fn predict_query(
    State(state): State<AppState>,
    params: Result<Query<PredictParams>, QueryRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Query(params) = params?;
    predict(&state, params, OffsetDateTime::now_utc()).await.map(Json)
}

async fn predict_body(
    State(state): State<AppState>,
    params: Result<Json<PredictParams>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(params) = params?;
    predict(&state, params, OffsetDateTime::now_utc()).await.map(Json)
}

/// Fetches UTC yesterday through the day after tomorrow, so the location's local
/// today and tomorrow are covered for any offset.
async fn predict(
    state: &AppState,
    params: PredictParams,
    now: OffsetDateTime,
) -> Result<PredictResponse, ApiError> {
    let coordinates = Coordinates::new(params.lat, params.lon)?;
    let timezone = Timezone::parse(&params.tz)?;

    let utc_today = now.date();
    let start = utc_today.checked_sub(Duration::DAY).unwrap_or(utc_today);
    let end = utc_today.checked_add(Duration::days(2)).unwrap_or(utc_today);
    let series = state
        .weather
        .hourly(&HourlyRequest::new(coordinates, start, end, timezone)?)
        .await?;

    let (d0, d1) = local_today_and_tomorrow(series.utc_offset_seconds, now);
    let forecast = state.model.predict(&series, d0, d1);

    Ok(PredictResponse {
        model: forecast.model,
        d0: forecast.d0,
        d1: forecast.d1,
        forecast_series: points_on(&series, d1),
        recent_actuals: points_on(&series, d0),
    })
}

async fn metrics_lite(State(state): State<AppState>) -> Json<MetricsReport> {
    Json(state.metrics.report())
}
