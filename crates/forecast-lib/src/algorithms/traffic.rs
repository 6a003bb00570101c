//! Hourly traffic flow forecasting with a random forest
//!
//! Each training row describes one observed hour by its calendar position,
//! weather, event impact and the previous hour's flow. Forecasts are
//! recursive: the lag feature of hour h+1 is the prediction for hour h.

use chrono::{DateTime, Datelike, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::output::{ModelOutput, ModelResult, Reliability};
use crate::error::{PipelineError, Result};
use crate::estimators::forest::{ForestConfig, RandomForest};
use crate::estimators::stats::{mae, mean, percentile, r_squared};
use crate::features::{keys, nearest_value, FeatureRecord};
use crate::models::{Horizon, ModelId, TimePoint};

pub const FEATURE_NAMES: [&str; 7] = [
    "hour_of_day",
    "day_of_week",
    "temperature",
    "precipitation",
    "visibility",
    "event",
    "flow_lag_1",
];

const DEFAULT_TEMPERATURE_C: f64 = 20.0;
const DEFAULT_PRECIPITATION_MM: f64 = 0.0;
const DEFAULT_VISIBILITY_KM: f64 = 10.0;
const HOUR_SECS: i64 = 3600;

/// Congestion classes, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionLevel {
    Low,
    Moderate,
    High,
    Severe,
}

/// How congestion breakpoints are obtained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CongestionThresholds {
    /// Fixed flow breakpoints (vehicles per hour)
    Absolute { moderate: f64, high: f64, severe: f64 },
    /// Percentiles (0-100) of the historical flow
    Quantile { moderate: f64, high: f64, severe: f64 },
}

impl Default for CongestionThresholds {
    fn default() -> Self {
        CongestionThresholds::Quantile {
            moderate: 50.0,
            high: 75.0,
            severe: 90.0,
        }
    }
}

/// Resolved flow breakpoints, non-decreasing
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CongestionBreakpoints {
    pub moderate: f64,
    pub high: f64,
    pub severe: f64,
}

impl CongestionThresholds {
    pub fn resolve(&self, history: &[f64]) -> CongestionBreakpoints {
        let (moderate, high, severe) = match self {
            CongestionThresholds::Absolute {
                moderate,
                high,
                severe,
            } => (*moderate, *high, *severe),
            CongestionThresholds::Quantile {
                moderate,
                high,
                severe,
            } => (
                percentile(history, *moderate),
                percentile(history, *high),
                percentile(history, *severe),
            ),
        };
        let high = high.max(moderate);
        CongestionBreakpoints {
            moderate,
            high,
            severe: severe.max(high),
        }
    }
}

impl CongestionBreakpoints {
    pub fn classify(&self, flow: f64) -> CongestionLevel {
        if flow < self.moderate {
            CongestionLevel::Low
        } else if flow < self.high {
            CongestionLevel::Moderate
        } else if flow < self.severe {
            CongestionLevel::High
        } else {
            CongestionLevel::Severe
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub max_features: Option<usize>,
    /// Upper clamp for predicted flow (vehicles per hour)
    pub max_flow_vph: f64,
    /// Weather lookups tolerate this much timestamp mismatch
    pub weather_tolerance_hours: i64,
    pub congestion: CongestionThresholds,
}

impl Default for TrafficParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 8,
            min_samples_leaf: 2,
            max_features: None,
            max_flow_vph: 10_000.0,
            weather_tolerance_hours: 3,
            congestion: CongestionThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyTrafficPrediction {
    pub hour_ahead: u32,
    pub timestamp: i64,
    pub predicted_flow: f64,
    pub lower: f64,
    pub upper: f64,
    pub congestion_level: CongestionLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficForecast {
    pub predictions: Vec<HourlyTrafficPrediction>,
    pub feature_importance: BTreeMap<String, f64>,
    pub congestion_breakpoints: CongestionBreakpoints,
    pub historical_mean_flow: f64,
    /// Mean predicted flow over mean historical flow
    pub mean_flow_ratio: f64,
}

impl TrafficForecast {
    pub fn predicted_series(&self) -> Vec<TimePoint> {
        self.predictions
            .iter()
            .map(|p| TimePoint::new(p.timestamp, p.predicted_flow))
            .collect()
    }
}

/// Context series looked up per hour
struct HourContext<'a> {
    temperature: Option<&'a [TimePoint]>,
    precipitation: Option<&'a [TimePoint]>,
    visibility: Option<&'a [TimePoint]>,
    events: Option<&'a [TimePoint]>,
    tolerance_secs: i64,
}

impl<'a> HourContext<'a> {
    fn from_record(record: &'a FeatureRecord, tolerance_hours: i64) -> Self {
        Self {
            temperature: record.series(keys::WEATHER_TEMPERATURE),
            precipitation: record.series(keys::WEATHER_PRECIPITATION),
            visibility: record.series(keys::WEATHER_VISIBILITY),
            events: record.series(keys::TRAFFIC_EVENT_HOURS),
            tolerance_secs: tolerance_hours * HOUR_SECS,
        }
    }

    fn lookup(&self, series: Option<&[TimePoint]>, ts: i64, default: f64) -> f64 {
        series
            .and_then(|s| nearest_value(s, ts, self.tolerance_secs))
            .unwrap_or(default)
    }

    fn row(&self, ts: i64, flow_lag: f64) -> Vec<f64> {
        let (hour, weekday) = DateTime::from_timestamp(ts, 0)
            .map(|dt| (dt.hour() as f64, dt.weekday().num_days_from_monday() as f64))
            .unwrap_or((0.0, 0.0));
        let event = self
            .events
            .and_then(|s| nearest_value(s, ts, HOUR_SECS / 2))
            .unwrap_or(0.0);
        vec![
            hour,
            weekday,
            self.lookup(self.temperature, ts, DEFAULT_TEMPERATURE_C),
            self.lookup(self.precipitation, ts, DEFAULT_PRECIPITATION_MM),
            self.lookup(self.visibility, ts, DEFAULT_VISIBILITY_KM),
            event,
            flow_lag,
        ]
    }
}

pub fn fit_and_forecast(
    record: &FeatureRecord,
    horizon: Horizon,
    params: &TrafficParams,
    seed: u64,
) -> Result<ModelResult> {
    let flow = record.require_series(keys::TRAFFIC_FLOW)?;
    if flow.len() < 3 {
        return Err(PipelineError::insufficient("traffic observations", 3, flow.len()));
    }
    let steps = horizon.steps();
    if steps == 0 {
        return Err(PipelineError::malformed("traffic horizon must be at least one hour"));
    }

    let context = HourContext::from_record(record, params.weather_tolerance_hours);
    let (x, y): (Vec<Vec<f64>>, Vec<f64>) = flow
        .windows(2)
        .map(|w| (context.row(w[1].timestamp, w[0].value), w[1].value))
        .unzip();

    let config = ForestConfig {
        n_trees: params.n_trees,
        max_depth: params.max_depth,
        min_samples_leaf: params.min_samples_leaf,
        max_features: params.max_features,
        seed,
    };
    let forest = RandomForest::fit(&x, &y, &config)?;

    let history: Vec<f64> = flow.iter().map(|p| p.value).collect();
    let breakpoints = params.congestion.resolve(&history);
    let clamp = |v: f64| v.clamp(0.0, params.max_flow_vph);

    let Some(last) = flow.last() else {
        return Err(PipelineError::insufficient("traffic observations", 3, 0));
    };
    let mut lag = last.value;
    let mut predictions = Vec::with_capacity(steps as usize);
    for hour_ahead in 1..=steps {
        let ts = last.timestamp + i64::from(hour_ahead) * HOUR_SECS;
        let (center, lower, upper) = forest.predict_interval(&context.row(ts, lag));
        let predicted_flow = clamp(center);
        predictions.push(HourlyTrafficPrediction {
            hour_ahead,
            timestamp: ts,
            predicted_flow,
            lower: clamp(lower),
            upper: clamp(upper),
            congestion_level: breakpoints.classify(predicted_flow),
        });
        lag = predicted_flow;
    }

    let feature_importance = FEATURE_NAMES
        .iter()
        .zip(forest.feature_importances())
        .map(|(name, imp)| (name.to_string(), *imp))
        .collect();

    let historical_mean_flow = mean(&history);
    let predicted: Vec<f64> = predictions.iter().map(|p| p.predicted_flow).collect();
    let mean_flow_ratio = if historical_mean_flow > 0.0 {
        mean(&predicted) / historical_mean_flow
    } else {
        1.0
    };

    let fitted: Vec<f64> = x.iter().map(|row| forest.predict(row)).collect();
    let final_half_width = predictions
        .last()
        .map(|p| (p.upper - p.lower) / 2.0)
        .unwrap_or(0.0);
    let oob = forest.oob_r2();
    let reliability = Reliability {
        r_squared: Some(r_squared(&y, &fitted)),
        mae: Some(mae(&y, &fitted)),
        oob_score: oob,
        confidence_interval: Some(final_half_width),
        ..Default::default()
    }
    .with_extra("n_trees", forest.n_trees() as f64)
    .with_extra("training_rows", y.len() as f64);

    let output = TrafficForecast {
        predictions,
        feature_importance,
        congestion_breakpoints: breakpoints,
        historical_mean_flow,
        mean_flow_ratio,
    };
    Ok(ModelResult::new(
        ModelId::Traffic,
        ModelOutput::Traffic(output),
        reliability,
        oob.unwrap_or(0.0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Domain;

    const START: i64 = 1_700_006_400; // 2023-11-15T00:00:00Z

    fn daily_profile(hour: i64) -> f64 {
        let h = (hour % 24) as f64;
        400.0 + 300.0 * ((h - 6.0) / 24.0 * std::f64::consts::TAU).sin().max(0.0)
    }

    fn traffic_record(hours: i64) -> FeatureRecord {
        let flow = (0..hours)
            .map(|h| TimePoint::new(START + h * 3600, daily_profile(h)))
            .collect();
        FeatureRecord::builder(Domain::Traffic)
            .insert_series(keys::TRAFFIC_FLOW, flow)
            .build()
    }

    #[test]
    fn test_congestion_classification_is_monotonic() {
        let bp = CongestionThresholds::Absolute {
            moderate: 30.0,
            high: 60.0,
            severe: 80.0,
        }
        .resolve(&[]);
        let mut previous = CongestionLevel::Low;
        for flow in 0..200 {
            let level = bp.classify(flow as f64);
            assert!(level >= previous);
            previous = level;
        }
        assert_eq!(bp.classify(29.9), CongestionLevel::Low);
        assert_eq!(bp.classify(60.0), CongestionLevel::High);
        assert_eq!(bp.classify(95.0), CongestionLevel::Severe);
    }

    #[test]
    fn test_quantile_breakpoints_follow_history() {
        let history: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let bp = CongestionThresholds::default().resolve(&history);
        assert!(bp.moderate <= bp.high && bp.high <= bp.severe);
        assert!((45.0..=55.0).contains(&bp.moderate));
        assert!((85.0..=95.0).contains(&bp.severe));
    }

    #[test]
    fn test_unordered_absolute_breakpoints_stay_monotonic() {
        let bp = CongestionThresholds::Absolute {
            moderate: 50.0,
            high: 20.0,
            severe: 10.0,
        }
        .resolve(&[]);
        assert!(bp.moderate <= bp.high && bp.high <= bp.severe);
    }

    #[test]
    fn test_forecast_shape_and_bounds() {
        let params = TrafficParams {
            n_trees: 25,
            ..Default::default()
        };
        let result = fit_and_forecast(&traffic_record(48), Horizon::Hours(12), &params, 42).unwrap();
        let ModelOutput::Traffic(forecast) = &result.output else {
            panic!("expected traffic output");
        };
        assert_eq!(forecast.predictions.len(), 12);
        for p in &forecast.predictions {
            assert!(p.predicted_flow >= 0.0 && p.predicted_flow <= params.max_flow_vph);
            assert!(p.lower <= p.predicted_flow && p.predicted_flow <= p.upper);
        }
        let total: f64 = forecast.feature_importance.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(forecast.mean_flow_ratio > 0.0);
        assert!((0.0..=1.0).contains(&result.confidence));
        assert_eq!(result.chained_outputs().len(), 2);
    }

    #[test]
    fn test_weather_and_events_feed_rows() {
        let record = FeatureRecord::merge([
            &traffic_record(30),
            &FeatureRecord::builder(Domain::Weather)
                .insert_series(keys::WEATHER_TEMPERATURE, vec![TimePoint::new(START, -5.0)])
                .build(),
        ])
        .unwrap();
        let context = HourContext::from_record(&record, 3);
        let row = context.row(START + 3600, 10.0);
        assert_eq!(row[2], -5.0);
        // outside tolerance falls back to the default
        let far = context.row(START + 10 * 3600, 10.0);
        assert_eq!(far[2], DEFAULT_TEMPERATURE_C);
        assert_eq!(far[4], DEFAULT_VISIBILITY_KM);
        assert_eq!(far[6], 10.0);
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let err = fit_and_forecast(
            &traffic_record(40),
            Horizon::Hours(0),
            &TrafficParams::default(),
            42,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput(_)));
    }
}
