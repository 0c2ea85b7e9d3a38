//! Next-day forecast from an hourly series.
//!
//! The forecast only consumes a parsed [`HourlySeries`]; it knows nothing about the
//! upstream that produced it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, UtcOffset};

use crate::adapters::HourlySeries;
use crate::CoreError;

/// Local "today" (D0) and "tomorrow" (D1) at a location with the given UTC offset.
///
/// Offsets outside the representable range fall back to UTC.
pub fn local_today_and_tomorrow(utc_offset_seconds: i32, now: OffsetDateTime) -> (Date, Date) {
    let offset = UtcOffset::from_whole_seconds(utc_offset_seconds).unwrap_or(UtcOffset::UTC);
    let d0 = now.to_offset(offset).date();
    let d1 = d0.next_day().unwrap_or(d0);
    (d0, d1)
}

/// One hourly observation or forecast point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyPoint {
    pub time: String,
    pub temperature_2m: Option<f64>,
    pub precipitation: Option<f64>,
}

/// Points of `series` whose local timestamp falls on `day`.
pub fn points_on(series: &HourlySeries, day: Date) -> Vec<HourlyPoint> {
    let prefix = format!("{day}T");
    series
        .times
        .iter()
        .zip(&series.temperature_2m)
        .zip(&series.precipitation)
        .filter(|((time, _), _)| time.starts_with(&prefix))
        .map(|((time, temperature), precipitation)| HourlyPoint {
            time: time.clone(),
            temperature_2m: *temperature,
            precipitation: *precipitation,
        })
        .collect()
}

/// Daily aggregates: mean/min/max temperature, precipitation sum and the share of
/// hours with measurable precipitation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DayStats {
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub precip: Option<f64>,
    pub precip_prob: Option<f64>,
}

impl DayStats {
    pub fn from_points(points: &[HourlyPoint]) -> Self {
        let temperatures: Vec<f64> = points.iter().filter_map(|p| p.temperature_2m).collect();
        let precipitation: Vec<f64> = points.iter().filter_map(|p| p.precipitation).collect();

        let (mean, min, max) = if temperatures.is_empty() {
            (None, None, None)
        } else {
            let sum: f64 = temperatures.iter().sum();
            (
                Some(sum / temperatures.len() as f64),
                temperatures.iter().copied().reduce(f64::min),
                temperatures.iter().copied().reduce(f64::max),
            )
        };
        let (precip, precip_prob) = if precipitation.is_empty() {
            (None, None)
        } else {
            let wet = precipitation.iter().filter(|mm| **mm > 0.0).count();
            (
                Some(precipitation.iter().sum()),
                Some(wet as f64 / precipitation.len() as f64),
            )
        };

        Self {
            mean,
            min,
            max,
            precip,
            precip_prob,
        }
    }

    fn features(&self) -> Option<[f64; 4]> {
        Some([self.mean?, self.min?, self.max?, self.precip?])
    }
}

/// Aggregates for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayBlock {
    pub date: String,
    #[serde(flatten)]
    pub stats: DayStats,
}

impl DayBlock {
    pub fn new(date: Date, stats: DayStats) -> Self {
        Self {
            date: date.to_string(),
            stats,
        }
    }
}

/// D0 observation plus D1 prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextDayForecast {
    pub model: &'static str,
    pub d0: DayBlock,
    pub d1: DayBlock,
}

/// Contract for anything that turns an hourly series into a next-day forecast.
pub trait NextDayModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn predict(&self, series: &HourlySeries, d0: Date, d1: Date) -> NextDayForecast;
}

/// D0 aggregates, using the whole series when D0 has no points.
fn d0_stats(series: &HourlySeries, d0: Date) -> DayStats {
    let points = points_on(series, d0);
    if points.is_empty() {
        let all = points_on_all(series);
        return DayStats::from_points(&all);
    }
    DayStats::from_points(&points)
}

fn points_on_all(series: &HourlySeries) -> Vec<HourlyPoint> {
    series
        .times
        .iter()
        .zip(&series.temperature_2m)
        .zip(&series.precipitation)
        .map(|((time, temperature), precipitation)| HourlyPoint {
            time: time.clone(),
            temperature_2m: *temperature,
            precipitation: *precipitation,
        })
        .collect()
}

/// Tomorrow looks like today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceModel;

impl NextDayModel for PersistenceModel {
    fn name(&self) -> &'static str {
        "persistence"
    }

    fn predict(&self, series: &HourlySeries, d0: Date, d1: Date) -> NextDayForecast {
        let stats = d0_stats(series, d0);
        NextDayForecast {
            model: self.name(),
            d0: DayBlock::new(d0, stats),
            d1: DayBlock::new(d1, stats),
        }
    }
}

/// Multi-output linear map from D0 `[mean, min, max, precip]` to the same D1 values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: [[f64; 4]; 4],
    pub bias: [f64; 4],
}

impl LinearModel {
    pub fn apply(&self, features: [f64; 4]) -> [f64; 4] {
        let mut output = self.bias;
        for (out, row) in output.iter_mut().zip(&self.weights) {
            *out += row
                .iter()
                .zip(features)
                .map(|(weight, feature)| weight * feature)
                .sum::<f64>();
        }
        output
    }
}

/// Saved model artifact.
///
/// `Legacy` is the bare model format; `Pipelined` wraps the model with options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ModelArtifact {
    Legacy(LinearModel),
    Pipelined {
        model: LinearModel,
        /// Model predicts the D1 - D0 delta rather than D1 directly.
        #[serde(default)]
        residual: bool,
    },
}

impl ModelArtifact {
    pub fn load_from_file(path: &Path) -> Result<Self, CoreError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Resolves the artifact format once into a ready-to-use model.
    pub fn into_model(self) -> RegressionModel {
        match self {
            Self::Legacy(model) => RegressionModel {
                model,
                residual: false,
            },
            Self::Pipelined { model, residual } => RegressionModel { model, residual },
        }
    }
}

/// Linear next-day model; falls back to persistence when D0 aggregates are incomplete.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionModel {
    model: LinearModel,
    residual: bool,
}

impl NextDayModel for RegressionModel {
    fn name(&self) -> &'static str {
        "regression"
    }

    fn predict(&self, series: &HourlySeries, d0: Date, d1: Date) -> NextDayForecast {
        let stats = d0_stats(series, d0);
        let Some(features) = stats.features() else {
            return PersistenceModel.predict(series, d0, d1);
        };

        let mut predicted = self.model.apply(features);
        if self.residual {
            for (value, feature) in predicted.iter_mut().zip(features) {
                *value += feature;
            }
        }
        let [mean, min, max, precip] = predicted;

        NextDayForecast {
            model: self.name(),
            d0: DayBlock::new(d0, stats),
            d1: DayBlock::new(
                d1,
                DayStats {
                    mean: Some(mean),
                    min: Some(min),
                    max: Some(max),
                    precip: Some(precip.max(0.0)),
                    precip_prob: stats.precip_prob,
                },
            ),
        }
    }
}
