//! Algorithm library
//!
//! One module per forecasting model. Every model exposes a
//! `fit_and_forecast` function that refits its estimator on the supplied
//! record and returns a [`ModelResult`]. The registry stores an
//! [`Algorithm`] tag per model and the engine dispatches through
//! [`Algorithm::run`].

pub mod air_quality;
pub mod crime;
pub mod energy;
pub mod growth;
pub mod land_use;
pub mod output;
pub mod traffic;
pub mod transit;

pub use output::{ModelOutput, ModelResult, Reliability};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::features::FeatureRecord;
use crate::models::{Horizon, ModelId};

/// Default seed for every randomized estimator
pub const DEFAULT_SEED: u64 = 42;

/// Estimator family backing a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    RandomForest,
    Arima,
    Ridge,
    Dbscan,
    IsolationForest,
    SeasonalDecomposition,
    ClusteringScoring,
}

impl Algorithm {
    pub fn label(&self) -> &'static str {
        match self {
            Algorithm::RandomForest => "Random Forest regression",
            Algorithm::Arima => "ARIMA",
            Algorithm::Ridge => "Ridge regression",
            Algorithm::Dbscan => "DBSCAN + weighted centroid",
            Algorithm::IsolationForest => "Isolation Forest",
            Algorithm::SeasonalDecomposition => "Seasonal decomposition",
            Algorithm::ClusteringScoring => "Clustering + scoring",
        }
    }

    /// Fits the estimator on `record` and forecasts over `horizon`
    pub fn run(&self, record: &FeatureRecord, horizon: Horizon, params: &ModelParams) -> Result<ModelResult> {
        match self {
            Algorithm::RandomForest => {
                traffic::fit_and_forecast(record, horizon, &params.traffic, params.seed)
            }
            Algorithm::Arima => air_quality::fit_and_forecast(record, horizon, &params.aqi),
            Algorithm::Ridge => growth::fit_and_forecast(record, horizon, &params.urban_growth),
            Algorithm::Dbscan => transit::fit_and_forecast(record, horizon, &params.transit),
            Algorithm::IsolationForest => {
                crime::fit_and_forecast(record, horizon, &params.crime, params.seed)
            }
            Algorithm::SeasonalDecomposition => {
                energy::fit_and_forecast(record, horizon, &params.energy_demand)
            }
            Algorithm::ClusteringScoring => {
                land_use::fit_and_forecast(record, horizon, &params.land_use, params.seed)
            }
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Tunable parameters of all models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub seed: u64,
    pub traffic: traffic::TrafficParams,
    pub aqi: air_quality::AqiParams,
    pub urban_growth: growth::GrowthParams,
    pub transit: transit::TransitParams,
    pub crime: crime::CrimeParams,
    pub energy_demand: energy::EnergyParams,
    pub land_use: land_use::LandUseParams,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            traffic: Default::default(),
            aqi: Default::default(),
            urban_growth: Default::default(),
            transit: Default::default(),
            crime: Default::default(),
            energy_demand: Default::default(),
            land_use: Default::default(),
        }
    }
}

impl ModelParams {
    /// The parameters that influence `model`, as hashed into cache fingerprints
    pub fn fingerprint_section(&self, model: ModelId) -> Result<serde_json::Value> {
        let section = match model {
            ModelId::Traffic => serde_json::to_value(&self.traffic),
            ModelId::Aqi => serde_json::to_value(&self.aqi),
            ModelId::UrbanGrowth => serde_json::to_value(&self.urban_growth),
            ModelId::Transit => serde_json::to_value(&self.transit),
            ModelId::Crime => serde_json::to_value(&self.crime),
            ModelId::EnergyDemand => serde_json::to_value(&self.energy_demand),
            ModelId::LandUse => serde_json::to_value(&self.land_use),
        }
        .map_err(|e| PipelineError::malformed(format!("{} parameters: {}", model, e)))?;
        Ok(serde_json::json!({ "seed": self.seed, "params": section }))
    }
}
