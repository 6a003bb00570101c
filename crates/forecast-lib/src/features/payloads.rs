//! Raw collector payload schemas
//!
//! One JSON object per domain. These structs only describe shape; unit
//! normalization and history checks happen in the adapter.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};
use crate::models::{Domain, LandUseKind};

/// Raw per-domain payloads supplied with a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawPayloads {
    payloads: BTreeMap<Domain, serde_json::Value>,
}

impl RawPayloads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, domain: Domain, payload: serde_json::Value) {
        self.payloads.insert(domain, payload);
    }

    pub fn with(mut self, domain: Domain, payload: serde_json::Value) -> Self {
        self.insert(domain, payload);
        self
    }

    pub fn get(&self, domain: Domain) -> Option<&serde_json::Value> {
        self.payloads.get(&domain)
    }

    pub fn contains(&self, domain: Domain) -> bool {
        self.payloads.contains_key(&domain)
    }

    pub fn domains(&self) -> impl Iterator<Item = Domain> + '_ {
        self.payloads.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

/// Timestamp as unix seconds or an RFC 3339 string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Seconds(i64),
    Text(String),
}

impl RawTimestamp {
    pub fn to_unix(&self) -> Result<i64> {
        match self {
            RawTimestamp::Seconds(s) => Ok(*s),
            RawTimestamp::Text(text) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                    return Ok(dt.timestamp());
                }
                // Naive date-times are taken as UTC
                for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
                    if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
                        return Ok(naive.and_utc().timestamp());
                    }
                }
                Err(PipelineError::malformed(format!(
                    "unparseable timestamp '{}'",
                    text
                )))
            }
        }
    }
}

/// Unix timestamp of 1 January, 00:00 UTC of `year`
pub fn year_start(year: i32) -> Result<i64> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(|| PipelineError::malformed(format!("year {} out of range", year)))
}

/// Fractional calendar year of a unix timestamp
pub fn fractional_year(ts: i64) -> f64 {
    use chrono::Datelike;
    let Some(dt) = DateTime::<Utc>::from_timestamp(ts, 0) else {
        return 1970.0;
    };
    let year = dt.year();
    let (Ok(start), Ok(end)) = (year_start(year), year_start(year + 1)) else {
        return year as f64;
    };
    year as f64 + (ts - start) as f64 / (end - start) as f64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
    Kelvin,
}

impl TemperatureUnit {
    pub fn to_celsius(&self, value: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => value,
            TemperatureUnit::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
            TemperatureUnit::Kelvin => value - 273.15,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationUnit {
    #[default]
    Persons,
    Thousands,
    Millions,
}

impl PopulationUnit {
    pub fn to_persons(&self, value: f64) -> f64 {
        let scaled = match self {
            PopulationUnit::Persons => value,
            PopulationUnit::Thousands => value * 1_000.0,
            PopulationUnit::Millions => value * 1_000_000.0,
        };
        scaled.round()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemandUnit {
    Kw,
    #[default]
    Mw,
    Gw,
}

impl DemandUnit {
    pub fn to_mw(&self, value: f64) -> f64 {
        match self {
            DemandUnit::Kw => value / 1_000.0,
            DemandUnit::Mw => value,
            DemandUnit::Gw => value * 1_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayType {
    Weekday,
    Weekend,
    Holiday,
}

impl DayType {
    pub fn code(&self) -> f64 {
        match self {
            DayType::Weekday => 0.0,
            DayType::Weekend => 1.0,
            DayType::Holiday => 2.0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrafficPayload {
    pub observations: Vec<TrafficObservation>,
    #[serde(default)]
    pub events: Vec<TrafficEvent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrafficObservation {
    pub timestamp: RawTimestamp,
    pub flow: f64,
    pub speed: Option<f64>,
    pub occupancy: Option<f64>,
}

fn default_event_duration() -> u32 {
    3
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrafficEvent {
    pub timestamp: RawTimestamp,
    #[serde(default = "default_event_duration")]
    pub duration_hours: u32,
    pub impact: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WeatherPayload {
    #[serde(default)]
    pub temperature_unit: TemperatureUnit,
    pub observations: Vec<WeatherObservation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WeatherObservation {
    pub timestamp: RawTimestamp,
    pub temperature: Option<f64>,
    pub precipitation: Option<f64>,
    pub visibility: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AqiPayload {
    pub observations: Vec<AqiObservation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AqiObservation {
    pub timestamp: RawTimestamp,
    pub aqi: f64,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub o3: Option<f64>,
    pub no2: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DemographicPayload {
    #[serde(default)]
    pub population_unit: PopulationUnit,
    pub records: Vec<DemographicRecord>,
    pub density_per_km2: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DemographicRecord {
    pub year: i32,
    pub population: f64,
    pub built_area: f64,
    pub gdp: f64,
    pub employment_rate: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EnergyPayload {
    #[serde(default)]
    pub demand_unit: DemandUnit,
    #[serde(default)]
    pub temperature_unit: TemperatureUnit,
    pub observations: Vec<EnergyObservation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EnergyObservation {
    pub timestamp: RawTimestamp,
    pub demand: f64,
    pub temperature: Option<f64>,
    pub day_type: Option<DayType>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IncidentPayload {
    pub incidents: Vec<IncidentReport>,
}

fn default_severity() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
pub(crate) struct IncidentReport {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: RawTimestamp,
    pub category: Option<String>,
    #[serde(default = "default_severity")]
    pub severity: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MobilityPayload {
    pub demand_points: Vec<DemandPoint>,
    #[serde(default)]
    pub existing_stops: Vec<StopLocation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DemandPoint {
    pub lat: f64,
    pub lon: f64,
    pub demand: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StopLocation {
    pub lat: f64,
    pub lon: f64,
    pub capacity: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParcelPayload {
    pub parcels: Vec<ParcelRecord>,
    #[serde(default)]
    pub transit_stops: Vec<StopLocation>,
    #[serde(default)]
    pub development_goals: DevelopmentGoals,
    #[serde(default)]
    pub zoning_caps: BTreeMap<LandUseKind, f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParcelRecord {
    pub id: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub current_use: LandUseKind,
    pub area_sqm: f64,
    pub value: f64,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DevelopmentGoals {
    pub housing_units: Option<f64>,
    pub jobs: Option<f64>,
    pub green_space_sqm: Option<f64>,
}
