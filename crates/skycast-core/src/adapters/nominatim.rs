//! Forward and reverse geocoding against a Nominatim (OpenStreetMap) instance.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::coerce_f64;
use crate::cache::{CacheStore, LruTtlCache};
use crate::circuit_breaker::CircuitSnapshot;
use crate::http_client::{HttpClient, HttpRequest};
use crate::invoker::{UpstreamError, UpstreamInvoker};
use crate::policy::UpstreamPolicy;
use crate::{Coordinates, ResponseSource, UpstreamId, ValidationError};

pub const DEFAULT_NOMINATIM_BASE: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_NOMINATIM_USER_AGENT: &str =
    concat!("skycast/", env!("CARGO_PKG_VERSION"), " (contact: ops@skycast.invalid)");

pub const MIN_QUERY_CHARS: usize = 2;
pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 10;

/// Geocoding client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodingConfig {
    pub base_url: String,
    /// Sent as `User-Agent`; the usage policy asks for an identifiable contact.
    pub user_agent: String,
    pub policy: UpstreamPolicy,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: String::from(DEFAULT_NOMINATIM_BASE),
            user_agent: String::from(DEFAULT_NOMINATIM_USER_AGENT),
            policy: UpstreamPolicy::nominatim_default(),
            cache_ttl: Duration::from_secs(600),
            cache_max_entries: 200,
        }
    }
}

/// Validated forward search parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocodeSearchRequest {
    query: String,
    limit: usize,
    country_codes: Option<String>,
    language: String,
}

impl GeocodeSearchRequest {
    pub fn new(
        query: &str,
        limit: usize,
        country_codes: Option<&str>,
        language: &str,
    ) -> Result<Self, ValidationError> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_CHARS {
            return Err(ValidationError::QueryTooShort {
                min: MIN_QUERY_CHARS,
            });
        }
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
            return Err(ValidationError::LimitOutOfRange {
                value: limit,
                min: MIN_LIMIT,
                max: MAX_LIMIT,
            });
        }

        Ok(Self {
            query: query.to_owned(),
            limit,
            country_codes: parse_country_codes(country_codes)?,
            language: parse_language(language)?,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub const fn limit(&self) -> usize {
        self.limit
    }

    pub fn country_codes(&self) -> Option<&str> {
        self.country_codes.as_deref()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Whitespace-collapsed, case-folded key so trivially different spellings share
    /// an entry.
    pub fn cache_key(&self) -> String {
        let query = self
            .query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        format!(
            "{query}|{}|{}|{}",
            self.limit,
            self.country_codes.as_deref().unwrap_or("-"),
            self.language.to_lowercase()
        )
    }
}

/// Validated reverse lookup parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReverseGeocodeRequest {
    coordinates: Coordinates,
    language: String,
}

impl ReverseGeocodeRequest {
    pub fn new(coordinates: Coordinates, language: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            coordinates,
            language: parse_language(language)?,
        })
    }

    pub const fn coordinates(&self) -> Coordinates {
        self.coordinates
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn cache_key(&self) -> String {
        format!(
            "rev|{:.5}|{:.5}|{}",
            self.coordinates.latitude(),
            self.coordinates.longitude(),
            self.language.to_lowercase()
        )
    }
}

fn parse_language(language: &str) -> Result<String, ValidationError> {
    let language = language.trim();
    if language.is_empty() {
        return Err(ValidationError::EmptyLanguage);
    }
    Ok(language.to_owned())
}

fn parse_country_codes(raw: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };

    let mut codes = Vec::new();
    for code in raw.split(',').map(str::trim) {
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCountryCodes {
                value: raw.to_owned(),
            });
        }
        codes.push(code.to_ascii_lowercase());
    }
    Ok(Some(codes.join(",")))
}

/// One place record as exposed to API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub class: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub importance: Option<f64>,
    /// `[south, north, west, east]`.
    pub bbox: Option<[f64; 4]>,
}

impl Place {
    /// Extracts the exposed fields from one `jsonv2` item. Never fails: fields that
    /// are missing or malformed become `None`.
    pub fn from_json(item: &Map<String, Value>) -> Self {
        let display_name = non_empty_string(item.get("display_name"));
        let name = non_empty_string(item.get("name")).or_else(|| display_name.clone());

        Self {
            name,
            display_name,
            lat: item.get("lat").and_then(coerce_f64),
            lon: item.get("lon").and_then(coerce_f64),
            class: non_empty_string(item.get("class")),
            kind: non_empty_string(item.get("type")),
            importance: item.get("importance").and_then(coerce_f64),
            bbox: item.get("boundingbox").and_then(coerce_bbox),
        }
    }
}

fn coerce_bbox(value: &Value) -> Option<[f64; 4]> {
    let items = value.as_array()?;
    if items.len() != 4 {
        return None;
    }
    let mut bbox = [0.0; 4];
    for (slot, item) in bbox.iter_mut().zip(items) {
        *slot = coerce_f64(item)?;
    }
    Some(bbox)
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

/// Forward search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeSearch {
    pub q: String,
    pub source: ResponseSource,
    pub results: Vec<Place>,
}

/// Reverse lookup result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeReverse {
    pub source: ResponseSource,
    pub result: Place,
}

#[derive(Debug, Clone)]
enum GeocodeEntry {
    Search(Vec<Place>),
    Reverse(Place),
}

/// Nominatim client: recency-bounded cache in front of a 1 req/s invoker.
#[derive(Debug)]
pub struct GeocodingClient {
    base_url: String,
    user_agent: String,
    invoker: UpstreamInvoker,
    cache: CacheStore<LruTtlCache<GeocodeEntry>>,
}

impl GeocodingClient {
    pub fn new(config: GeocodingConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            user_agent: config.user_agent,
            invoker: UpstreamInvoker::from_policy(&config.policy, http_client),
            cache: CacheStore::new(LruTtlCache::new(
                config.cache_ttl,
                config.cache_max_entries,
            )),
        }
    }

    pub fn breaker_snapshot(&self) -> CircuitSnapshot {
        self.invoker.breaker_snapshot()
    }

    pub async fn search(
        &self,
        request: &GeocodeSearchRequest,
    ) -> Result<GeocodeSearch, UpstreamError> {
        let key = request.cache_key();
        if let Some(GeocodeEntry::Search(results)) = self.cache.get::<GeocodeEntry>(&key) {
            tracing::debug!(key = %key, "geocode search cache hit");
            return Ok(GeocodeSearch {
                q: request.query().to_owned(),
                source: ResponseSource::Cache,
                results,
            });
        }

        let mut http_request = self
            .request("search", request.language())
            .with_query("q", request.query())
            .with_query("format", "jsonv2")
            .with_query("limit", request.limit())
            .with_query("addressdetails", 1);
        if let Some(country_codes) = request.country_codes() {
            http_request = http_request.with_query("countrycodes", country_codes);
        }

        let payload = self.invoker.invoke_json::<Value>(http_request).await?;
        let Value::Array(items) = payload else {
            return Err(UpstreamError::unexpected_shape(
                UpstreamId::Nominatim,
                "unexpected response from nominatim: expected a list",
            ));
        };

        let results: Vec<Place> = items
            .iter()
            .filter_map(Value::as_object)
            .map(Place::from_json)
            .collect();
        self.cache
            .set(key, GeocodeEntry::Search(results.clone()));

        Ok(GeocodeSearch {
            q: request.query().to_owned(),
            source: ResponseSource::Live,
            results,
        })
    }

    pub async fn reverse(
        &self,
        request: &ReverseGeocodeRequest,
    ) -> Result<GeocodeReverse, UpstreamError> {
        let key = request.cache_key();
        if let Some(GeocodeEntry::Reverse(result)) = self.cache.get::<GeocodeEntry>(&key) {
            tracing::debug!(key = %key, "reverse geocode cache hit");
            return Ok(GeocodeReverse {
                source: ResponseSource::Cache,
                result,
            });
        }

        let coordinates = request.coordinates();
        let http_request = self
            .request("reverse", request.language())
            .with_query("lat", coordinates.latitude())
            .with_query("lon", coordinates.longitude())
            .with_query("format", "jsonv2")
            .with_query("addressdetails", 1);

        let payload = self.invoker.invoke_json::<Value>(http_request).await?;
        let Value::Object(item) = payload else {
            return Err(UpstreamError::unexpected_shape(
                UpstreamId::Nominatim,
                "unexpected response from nominatim: expected an object",
            ));
        };

        let result = Place::from_json(&item);
        self.cache.set(key, GeocodeEntry::Reverse(result.clone()));

        Ok(GeocodeReverse {
            source: ResponseSource::Live,
            result,
        })
    }

    fn request(&self, endpoint: &str, language: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/{endpoint}", self.base_url))
            .with_header("user-agent", self.user_agent.as_str())
            .with_header("accept-language", language)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http_client::testing::ScriptedHttpClient;
    use crate::http_client::HttpResponse;
    use crate::invoker::UpstreamErrorKind;

    fn client(script: Vec<Result<HttpResponse, crate::HttpError>>) -> (GeocodingClient, Arc<ScriptedHttpClient>) {
        let scripted = Arc::new(ScriptedHttpClient::new(script));
        let config = GeocodingConfig {
            base_url: String::from("https://nominatim.test/"),
            policy: UpstreamPolicy {
                qps: 1000.0,
                ..UpstreamPolicy::nominatim_default()
            },
            ..GeocodingConfig::default()
        };
        (GeocodingClient::new(config, scripted.clone()), scripted)
    }

    #[test]
    fn search_request_validates_bounds() {
        assert_eq!(
            GeocodeSearchRequest::new(" x ", 5, None, "ja"),
            Err(ValidationError::QueryTooShort { min: 2 })
        );
        assert_eq!(
            GeocodeSearchRequest::new("Tokyo", 11, None, "ja"),
            Err(ValidationError::LimitOutOfRange {
                value: 11,
                min: 1,
                max: 10
            })
        );
        assert!(matches!(
            GeocodeSearchRequest::new("Tokyo", 5, Some("jpn"), "ja"),
            Err(ValidationError::InvalidCountryCodes { .. })
        ));
        assert_eq!(
            GeocodeSearchRequest::new("Tokyo", 5, None, " "),
            Err(ValidationError::EmptyLanguage)
        );

        let request = GeocodeSearchRequest::new("Tokyo", 5, Some("JP, us"), "ja").expect("valid");
        assert_eq!(request.country_codes(), Some("jp,us"));
    }

    #[test]
    fn search_cache_key_is_normalized() {
        let a = GeocodeSearchRequest::new("  Tokyo   Station ", 1, None, "ja").expect("valid");
        let b = GeocodeSearchRequest::new("tokyo station", 1, None, "JA").expect("valid");

        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "tokyo station|1|-|ja");
    }

    #[test]
    fn reverse_cache_key_rounds_to_five_decimals() {
        let coordinates = Coordinates::new(35.6812362, 139.7671248).expect("valid");
        let request = ReverseGeocodeRequest::new(coordinates, "en").expect("valid");

        assert_eq!(request.cache_key(), "rev|35.68124|139.76712|en");
    }

    #[test]
    fn place_coerces_mixed_numeric_fields() {
        let item = json!({
            "display_name": "Tokyo Station, Marunouchi",
            "name": "",
            "lat": "35.6812",
            "lon": 139.7671,
            "class": "railway",
            "type": "station",
            "importance": "not a number",
            "boundingbox": ["35.67", "35.69", "139.76", 139.77]
        });

        let place = Place::from_json(item.as_object().expect("object"));

        assert_eq!(place.name.as_deref(), Some("Tokyo Station, Marunouchi"));
        assert_eq!(place.lat, Some(35.6812));
        assert_eq!(place.lon, Some(139.7671));
        assert_eq!(place.kind.as_deref(), Some("station"));
        assert_eq!(place.importance, None);
        assert_eq!(place.bbox, Some([35.67, 35.69, 139.76, 139.77]));
    }

    #[test]
    fn bbox_with_wrong_arity_is_dropped() {
        let item = json!({ "boundingbox": ["1", "2", "3"], "lat": null, "lon": true });
        let place = Place::from_json(item.as_object().expect("object"));

        assert_eq!(place.bbox, None);
        assert_eq!(place.lat, None);
        assert_eq!(place.lon, None);
        assert_eq!(place.name, None);
    }

    #[tokio::test]
    async fn search_sends_policy_headers_and_caches_results() {
        let body = json!([
            {"name": "Tokyo Station", "display_name": "Tokyo Station, Japan", "lat": "35.68", "lon": "139.76"},
            "garbage"
        ]);
        let (client, scripted) = client(vec![Ok(HttpResponse::ok_json(body.to_string()))]);
        let request = GeocodeSearchRequest::new("Tokyo Station", 1, Some("jp"), "ja").expect("valid");

        let live = client.search(&request).await.expect("live search");
        let cached = client.search(&request).await.expect("cached search");

        assert_eq!(live.source, ResponseSource::Live);
        assert_eq!(live.results.len(), 1);
        assert_eq!(cached.source, ResponseSource::Cache);
        assert_eq!(cached.results, live.results);
        assert_eq!(scripted.call_count(), 1);

        let sent = &scripted.recorded_requests()[0];
        assert_eq!(sent.url, "https://nominatim.test/search");
        assert_eq!(sent.query_value("format"), Some("jsonv2"));
        assert_eq!(sent.query_value("limit"), Some("1"));
        assert_eq!(sent.query_value("addressdetails"), Some("1"));
        assert_eq!(sent.query_value("countrycodes"), Some("jp"));
        assert_eq!(
            sent.headers.get("accept-language").map(String::as_str),
            Some("ja")
        );
        assert!(sent.headers.contains_key("user-agent"));
    }

    #[tokio::test]
    async fn search_rejects_non_list_payload() {
        let (client, _) = client(vec![Ok(HttpResponse::ok_json(r#"{"error":"x"}"#))]);
        let request = GeocodeSearchRequest::new("Tokyo", 5, None, "ja").expect("valid");

        let error = client.search(&request).await.expect_err("object is not a list");

        assert_eq!(error.kind(), UpstreamErrorKind::UnexpectedShape);
        assert_eq!(error.http_status(), 502);
    }

    #[tokio::test]
    async fn reverse_returns_single_place_and_rejects_lists() {
        let (client, scripted) = client(vec![
            Ok(HttpResponse::ok_json(
                json!({"display_name": "Marunouchi", "lat": 35.68, "lon": 139.76}).to_string(),
            )),
            Ok(HttpResponse::ok_json("[]")),
        ]);
        let tokyo = ReverseGeocodeRequest::new(Coordinates::new(35.68, 139.76).expect("valid"), "ja")
            .expect("valid");
        let osaka = ReverseGeocodeRequest::new(Coordinates::new(34.69, 135.50).expect("valid"), "ja")
            .expect("valid");

        let found = client.reverse(&tokyo).await.expect("reverse lookup");
        assert_eq!(found.result.name.as_deref(), Some("Marunouchi"));
        assert_eq!(found.source, ResponseSource::Live);
        assert_eq!(scripted.recorded_requests()[0].query_value("lat"), Some("35.68"));

        let error = client.reverse(&osaka).await.expect_err("list is not an object");
        assert_eq!(error.kind(), UpstreamErrorKind::UnexpectedShape);
    }
}
