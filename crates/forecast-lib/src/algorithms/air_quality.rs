//! Daily air quality index forecasting with ARIMA
//!
//! - differencing order chosen by Dickey-Fuller
//! - `(p, q)` chosen by AIC or BIC
//! - the first forecast day is nudged by the upstream traffic flow ratio

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::output::{ModelOutput, ModelResult, Reliability, TRAFFIC_MEAN_FLOW_RATIO};
use crate::error::{PipelineError, Result};
use crate::estimators::arima::{ArimaConfig, ArimaModel, InformationCriterion};
use crate::estimators::stats::{mae, mean};
use crate::features::{keys, FeatureRecord};
use crate::models::{Horizon, ModelId};

const DAY_SECS: i64 = 86_400;
const Z_95: f64 = 1.96;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AqiParams {
    pub max_p: usize,
    pub max_d: usize,
    pub max_q: usize,
    pub criterion: InformationCriterion,
    /// Share of the traffic flow deviation passed through to day one
    pub traffic_sensitivity: f64,
}

impl Default for AqiParams {
    fn default() -> Self {
        Self {
            max_p: 2,
            max_d: 2,
            max_q: 2,
            criterion: InformationCriterion::Aic,
            traffic_sensitivity: 0.15,
        }
    }
}

impl AqiParams {
    fn arima_config(&self) -> ArimaConfig {
        ArimaConfig {
            max_p: self.max_p,
            max_d: self.max_d,
            max_q: self.max_q,
            criterion: self.criterion,
        }
    }
}

/// EPA air quality categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AqiCategory {
    Good,
    Moderate,
    #[serde(rename = "Unhealthy for Sensitive Groups")]
    UnhealthyForSensitiveGroups,
    Unhealthy,
    #[serde(rename = "Very Unhealthy")]
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn from_index(aqi: f64) -> Self {
        match aqi {
            v if v <= 50.0 => AqiCategory::Good,
            v if v <= 100.0 => AqiCategory::Moderate,
            v if v <= 150.0 => AqiCategory::UnhealthyForSensitiveGroups,
            v if v <= 200.0 => AqiCategory::Unhealthy,
            v if v <= 300.0 => AqiCategory::VeryUnhealthy,
            _ => AqiCategory::Hazardous,
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Air quality is satisfactory",
            AqiCategory::Moderate => {
                "Unusually sensitive people should consider limiting prolonged outdoor exertion"
            }
            AqiCategory::UnhealthyForSensitiveGroups => {
                "People with respiratory or heart conditions should limit prolonged outdoor exertion"
            }
            AqiCategory::Unhealthy => "Everyone should avoid prolonged outdoor exertion",
            AqiCategory::VeryUnhealthy => "Everyone should avoid all outdoor exertion",
            AqiCategory::Hazardous => "Everyone should remain indoors",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAqiPrediction {
    pub day_ahead: u32,
    pub timestamp: i64,
    pub predicted_aqi: f64,
    pub lower: f64,
    pub upper: f64,
    pub category: AqiCategory,
    pub health_recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AqiForecast {
    pub predictions: Vec<DailyAqiPrediction>,
    /// `(p, d, q)`
    pub model_order: String,
    pub current_aqi: f64,
    /// Most recent reading of each optional pollutant series
    pub latest_pollutants: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_adjustment: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_wind_speed: Option<f64>,
}

pub fn fit_and_forecast(record: &FeatureRecord, horizon: Horizon, params: &AqiParams) -> Result<ModelResult> {
    let history = record.require_series(keys::AQI_INDEX)?;
    let steps = horizon.steps();
    if steps == 0 {
        return Err(PipelineError::malformed("aqi horizon must be at least one day"));
    }
    let Some(last) = history.last() else {
        return Err(PipelineError::insufficient("aqi observations", 2, 0));
    };
    let values: Vec<f64> = history.iter().map(|p| p.value).collect();
    let model = ArimaModel::fit(&values, &params.arima_config())?;

    let traffic_adjustment = record
        .upstream_scalar(ModelId::Traffic, TRAFFIC_MEAN_FLOW_RATIO)
        .filter(|r| r.is_finite())
        .map(|ratio| (1.0 + params.traffic_sensitivity * (ratio - 1.0)).max(0.0));

    let predictions = model
        .forecast(steps as usize)
        .into_iter()
        .zip(1..=steps)
        .map(|(step, day_ahead)| {
            let factor = match (day_ahead, traffic_adjustment) {
                (1, Some(f)) => f,
                _ => 1.0,
            };
            let (lower, upper) = step.interval(Z_95);
            let predicted_aqi = (step.mean * factor).max(0.0);
            let category = AqiCategory::from_index(predicted_aqi);
            DailyAqiPrediction {
                day_ahead,
                timestamp: last.timestamp + i64::from(day_ahead) * DAY_SECS,
                predicted_aqi,
                lower: (lower * factor).max(0.0),
                upper: (upper * factor).max(0.0),
                category,
                health_recommendation: category.recommendation().to_string(),
            }
        })
        .collect::<Vec<_>>();

    let latest_pollutants = [
        ("pm25", keys::AQI_PM25),
        ("pm10", keys::AQI_PM10),
        ("o3", keys::AQI_O3),
        ("no2", keys::AQI_NO2),
    ]
    .into_iter()
    .filter_map(|(name, key)| {
        record
            .series(key)
            .and_then(|s| s.last())
            .map(|p| (name.to_string(), p.value))
    })
    .collect();

    let mean_wind_speed = record
        .series(keys::WEATHER_WIND_SPEED)
        .filter(|s| !s.is_empty())
        .map(|s| mean(&s.iter().map(|p| p.value).collect::<Vec<_>>()));

    let (observed, fitted): (Vec<f64>, Vec<f64>) = model.in_sample().into_iter().unzip();
    let fit_mae = mae(&observed, &fitted);
    let level = mean(&observed);
    let confidence = if level > 0.0 { 1.0 - fit_mae / level } else { 0.0 };
    let half_width = predictions
        .last()
        .map(|p| (p.upper - p.lower) / 2.0)
        .unwrap_or(0.0);

    let order = model.order;
    let reliability = Reliability {
        aic: Some(model.aic),
        bic: Some(model.bic),
        mae: Some(fit_mae),
        confidence_interval: Some(half_width),
        ..Default::default()
    }
    .with_extra("order_p", order.p as f64)
    .with_extra("order_d", order.d as f64)
    .with_extra("order_q", order.q as f64);

    let output = AqiForecast {
        predictions,
        model_order: order.to_string(),
        current_aqi: last.value,
        latest_pollutants,
        traffic_adjustment,
        mean_wind_speed,
    };
    Ok(ModelResult::new(
        ModelId::Aqi,
        ModelOutput::AirQuality(output),
        reliability,
        confidence,
    ))
}
