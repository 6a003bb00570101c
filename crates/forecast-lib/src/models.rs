//! Core data models for the forecasting pipeline

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::PipelineError;

/// Identifier of one of the seven forecasting models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelId {
    #[serde(rename = "traffic")]
    Traffic,
    #[serde(rename = "aqi")]
    Aqi,
    #[serde(rename = "urban_growth")]
    UrbanGrowth,
    #[serde(rename = "transit")]
    Transit,
    #[serde(rename = "crime")]
    Crime,
    #[serde(rename = "energy_demand")]
    EnergyDemand,
    #[serde(rename = "land_use")]
    LandUse,
}

impl ModelId {
    pub const ALL: [ModelId; 7] = [
        ModelId::Traffic,
        ModelId::Aqi,
        ModelId::UrbanGrowth,
        ModelId::Transit,
        ModelId::Crime,
        ModelId::EnergyDemand,
        ModelId::LandUse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Traffic => "traffic",
            ModelId::Aqi => "aqi",
            ModelId::UrbanGrowth => "urban_growth",
            ModelId::Transit => "transit",
            ModelId::Crime => "crime",
            ModelId::EnergyDemand => "energy_demand",
            ModelId::LandUse => "land_use",
        }
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ModelId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| PipelineError::UnknownModel(s.to_string()))
    }
}

/// Source domain of a raw payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Traffic,
    Weather,
    Aqi,
    Demographic,
    Energy,
    Incident,
    Mobility,
    Parcel,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Traffic => "traffic",
            Domain::Weather => "weather",
            Domain::Aqi => "aqi",
            Domain::Demographic => "demographic",
            Domain::Energy => "energy",
            Domain::Incident => "incident",
            Domain::Mobility => "mobility",
            Domain::Parcel => "parcel",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forecast horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "snake_case")]
pub enum Horizon {
    Hours(u32),
    Days(u32),
    Years(u32),
    /// Static analyses without a forward time span
    NotApplicable,
}

impl Horizon {
    /// Number of forecast steps in the horizon's own unit
    pub fn steps(&self) -> u32 {
        match self {
            Horizon::Hours(n) | Horizon::Days(n) | Horizon::Years(n) => *n,
            Horizon::NotApplicable => 0,
        }
    }

    /// Same unit, different length
    pub fn with_steps(&self, steps: u32) -> Horizon {
        match self {
            Horizon::Hours(_) => Horizon::Hours(steps),
            Horizon::Days(_) => Horizon::Days(steps),
            Horizon::Years(_) => Horizon::Years(steps),
            Horizon::NotApplicable => Horizon::NotApplicable,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Horizon::Hours(_) => "hours",
            Horizon::Days(_) => "days",
            Horizon::Years(_) => "years",
            Horizon::NotApplicable => "n/a",
        }
    }
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Horizon::NotApplicable => write!(f, "n/a"),
            other => write!(f, "{}{}", other.steps(), &other.unit()[..1]),
        }
    }
}

/// One observation of a time series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub value: f64,
}

impl TimePoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A located observation (demand point, incident, parcel, stop)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialPoint {
    pub lat: f64,
    pub lon: f64,
    /// Demand, severity or area depending on the feature
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Secondary magnitude (e.g. parcel value)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl SpatialPoint {
    pub fn new(lat: f64, lon: f64, weight: f64) -> Self {
        Self {
            lat,
            lon,
            weight,
            timestamp: None,
            label: None,
            magnitude: None,
            id: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_magnitude(mut self, magnitude: f64) -> Self {
        self.magnitude = Some(magnitude);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Typed feature value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FeatureValue {
    Scalar(f64),
    Series(Vec<TimePoint>),
    Points(Vec<SpatialPoint>),
}

impl FeatureValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            FeatureValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&[TimePoint]> {
        match self {
            FeatureValue::Series(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_points(&self) -> Option<&[SpatialPoint]> {
        match self {
            FeatureValue::Points(p) => Some(p),
            _ => None,
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FeatureValue::Scalar(_) => FieldKind::Scalar,
            FeatureValue::Series(_) => FieldKind::Series,
            FeatureValue::Points(_) => FieldKind::Points,
        }
    }
}

/// Kind of a feature or output field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Scalar,
    Series,
    Points,
    Text,
    List,
    Map,
}

/// Land-use category of a parcel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandUseKind {
    Residential,
    Commercial,
    Industrial,
    Green,
}

impl LandUseKind {
    pub const ALL: [LandUseKind; 4] = [
        LandUseKind::Residential,
        LandUseKind::Commercial,
        LandUseKind::Industrial,
        LandUseKind::Green,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LandUseKind::Residential => "residential",
            LandUseKind::Commercial => "commercial",
            LandUseKind::Industrial => "industrial",
            LandUseKind::Green => "green",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            LandUseKind::Residential => 0,
            LandUseKind::Commercial => 1,
            LandUseKind::Industrial => 2,
            LandUseKind::Green => 3,
        }
    }
}

impl FromStr for LandUseKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LandUseKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PipelineError::malformed(format!("unknown land use '{}'", s)))
    }
}

impl std::fmt::Display for LandUseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
