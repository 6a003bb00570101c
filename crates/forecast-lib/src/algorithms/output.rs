//! Model results and fit diagnostics
//!
//! A [`ModelResult`] is produced once per successful model run and shared
//! through `Arc`. Its chained outputs are what dependents see as
//! `upstream.<model>.<field>` features.

use serde::Serialize;
use std::collections::BTreeMap;

use super::air_quality::AqiForecast;
use super::crime::CrimeAnalysis;
use super::energy::EnergyForecast;
use super::growth::GrowthForecast;
use super::land_use::LandUsePlan;
use super::traffic::TrafficForecast;
use super::transit::TransitPlan;
use crate::models::{FeatureValue, ModelId};

/// Fields published downstream by the traffic model
pub const TRAFFIC_MEAN_FLOW_RATIO: &str = "mean_flow_ratio";
pub const TRAFFIC_PREDICTED_FLOW: &str = "predicted_flow";

/// Fields published downstream by the urban growth model
pub const GROWTH_POPULATION_PROJECTION: &str = "population_projection";
pub const GROWTH_ANNUAL_RATE: &str = "annual_growth_rate";
pub const GROWTH_FACTOR: &str = "population_growth_factor";

/// Fit diagnostics. Only the measures an estimator produces are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reliability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r_squared: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mae: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rmse: Option<f64>,
    /// Half-width of the 95% interval at the final horizon step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oob_score: Option<f64>,
    /// Estimator-specific diagnostics (chosen alpha, eps, order terms, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, f64>,
}

impl Reliability {
    pub fn with_extra(mut self, key: &str, value: f64) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// Structured output, one variant per model
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModelOutput {
    Traffic(TrafficForecast),
    AirQuality(AqiForecast),
    UrbanGrowth(GrowthForecast),
    Transit(TransitPlan),
    Crime(CrimeAnalysis),
    EnergyDemand(EnergyForecast),
    LandUse(LandUsePlan),
}

/// Outcome of one successful model run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelResult {
    pub model: ModelId,
    pub output: ModelOutput,
    pub reliability: Reliability,
    /// In [0, 1]
    pub confidence: f64,
}

impl ModelResult {
    pub fn new(model: ModelId, output: ModelOutput, reliability: Reliability, confidence: f64) -> Self {
        Self {
            model,
            output,
            reliability,
            confidence: clamp_confidence(confidence),
        }
    }

    /// Values injected into dependents under `upstream.<model>.<field>`
    pub fn chained_outputs(&self) -> Vec<(&'static str, FeatureValue)> {
        match &self.output {
            ModelOutput::Traffic(forecast) => vec![
                (
                    TRAFFIC_MEAN_FLOW_RATIO,
                    FeatureValue::Scalar(forecast.mean_flow_ratio),
                ),
                (
                    TRAFFIC_PREDICTED_FLOW,
                    FeatureValue::Series(forecast.predicted_series()),
                ),
            ],
            ModelOutput::UrbanGrowth(forecast) => vec![
                (
                    GROWTH_POPULATION_PROJECTION,
                    FeatureValue::Series(forecast.population_projection.clone()),
                ),
                (
                    GROWTH_ANNUAL_RATE,
                    FeatureValue::Scalar(forecast.annual_growth_rate),
                ),
                (
                    GROWTH_FACTOR,
                    FeatureValue::Scalar(forecast.population_growth_factor),
                ),
            ],
            _ => Vec::new(),
        }
    }
}

/// Non-finite confidences collapse to 0
pub fn clamp_confidence(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
