//! Provider adapters for the upstream services.

pub mod nominatim;
pub mod open_meteo;

pub use nominatim::{
    GeocodeReverse, GeocodeSearch, GeocodeSearchRequest, GeocodingClient, GeocodingConfig, Place,
    ReverseGeocodeRequest,
};
pub use open_meteo::{
    DailySeries, HourlyRequest, HourlySeries, RecentDaily, WeatherClient, WeatherConfig,
};

use serde_json::Value;

/// Coerces a JSON number or numeric string to `f64`; anything else is `None`.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}
