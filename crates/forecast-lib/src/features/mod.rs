//! Feature records and the feature adapter
//!
//! Raw domain payloads are normalized into immutable [`FeatureRecord`]s.
//! Keys are namespaced by domain (`traffic.flow`, `weather.temperature`);
//! the `upstream.` namespace is reserved for chained model outputs injected
//! by the execution engine.

mod adapter;
mod payloads;

pub use adapter::{FeatureAdapter, HistoryRequirements};
pub use payloads::{fractional_year, year_start, RawPayloads, RawTimestamp, TemperatureUnit};

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PipelineError, Result};
use crate::models::{Domain, FeatureValue, ModelId, SpatialPoint, TimePoint};

/// Prefix reserved for chained model outputs
pub const UPSTREAM_PREFIX: &str = "upstream.";

/// Feature keys produced by the adapter
pub mod keys {
    pub const TRAFFIC_FLOW: &str = "traffic.flow";
    pub const TRAFFIC_SPEED: &str = "traffic.speed";
    pub const TRAFFIC_OCCUPANCY: &str = "traffic.occupancy";
    pub const TRAFFIC_EVENT_HOURS: &str = "traffic.event_hours";

    pub const WEATHER_TEMPERATURE: &str = "weather.temperature";
    pub const WEATHER_PRECIPITATION: &str = "weather.precipitation";
    pub const WEATHER_VISIBILITY: &str = "weather.visibility";
    pub const WEATHER_HUMIDITY: &str = "weather.humidity";
    pub const WEATHER_WIND_SPEED: &str = "weather.wind_speed";

    pub const AQI_INDEX: &str = "aqi.index";
    pub const AQI_PM25: &str = "aqi.pm25";
    pub const AQI_PM10: &str = "aqi.pm10";
    pub const AQI_O3: &str = "aqi.o3";
    pub const AQI_NO2: &str = "aqi.no2";

    pub const DEMOGRAPHIC_POPULATION: &str = "demographic.population";
    pub const DEMOGRAPHIC_BUILT_AREA: &str = "demographic.built_area";
    pub const DEMOGRAPHIC_GDP: &str = "demographic.gdp";
    pub const DEMOGRAPHIC_EMPLOYMENT: &str = "demographic.employment_rate";
    pub const DEMOGRAPHIC_DENSITY: &str = "demographic.density_per_km2";

    pub const ENERGY_DEMAND: &str = "energy.demand";
    pub const ENERGY_TEMPERATURE: &str = "energy.temperature";
    /// 0 = weekday, 1 = weekend, 2 = holiday
    pub const ENERGY_DAY_TYPE: &str = "energy.day_type";

    pub const INCIDENT_POINTS: &str = "incident.points";

    pub const MOBILITY_DEMAND_POINTS: &str = "mobility.demand_points";
    pub const MOBILITY_EXISTING_STOPS: &str = "mobility.existing_stops";

    pub const PARCEL_PARCELS: &str = "parcel.parcels";
    pub const PARCEL_TRANSIT_STOPS: &str = "parcel.transit_stops";
    pub const PARCEL_GOAL_HOUSING_UNITS: &str = "parcel.goal.housing_units";
    pub const PARCEL_GOAL_JOBS: &str = "parcel.goal.jobs";
    pub const PARCEL_GOAL_GREEN_SPACE: &str = "parcel.goal.green_space_sqm";
    pub const PARCEL_ZONING_CAP_PREFIX: &str = "parcel.zoning_cap.";
}

/// Immutable mapping from feature keys to typed values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    domains: BTreeSet<Domain>,
    features: BTreeMap<String, FeatureValue>,
}

impl FeatureRecord {
    pub fn builder(domain: Domain) -> FeatureRecordBuilder {
        FeatureRecordBuilder {
            domain,
            features: BTreeMap::new(),
        }
    }

    /// Empty record with no source domain (used for models whose inputs are all optional)
    pub fn empty() -> Self {
        Self {
            domains: BTreeSet::new(),
            features: BTreeMap::new(),
        }
    }

    /// Union of several domain records. Keys never collide across domains;
    /// a collision means two records claim the same feature and is rejected.
    pub fn merge<'a>(records: impl IntoIterator<Item = &'a FeatureRecord>) -> Result<Self> {
        let mut merged = Self::empty();
        for record in records {
            merged.domains.extend(record.domains.iter().copied());
            for (key, value) in &record.features {
                if merged.features.contains_key(key) {
                    return Err(PipelineError::malformed(format!(
                        "feature '{}' supplied by more than one record",
                        key
                    )));
                }
                merged.features.insert(key.clone(), value.clone());
            }
        }
        Ok(merged)
    }

    /// Key under which a chained output of `model` is injected
    pub fn upstream_key(model: ModelId, field: &str) -> String {
        format!("{}{}.{}", UPSTREAM_PREFIX, model.as_str(), field)
    }

    /// Returns a copy with a chained output added under the reserved namespace
    pub fn with_injected(&self, model: ModelId, field: &str, value: FeatureValue) -> Result<Self> {
        let key = Self::upstream_key(model, field);
        if self.features.contains_key(&key) {
            return Err(PipelineError::malformed(format!(
                "upstream feature '{}' injected twice",
                key
            )));
        }
        let mut next = self.clone();
        next.features.insert(key, value);
        Ok(next)
    }

    pub fn domains(&self) -> &BTreeSet<Domain> {
        &self.domains
    }

    pub fn get(&self, key: &str) -> Option<&FeatureValue> {
        self.features.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.features.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn scalar(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(FeatureValue::as_scalar)
    }

    pub fn series(&self, key: &str) -> Option<&[TimePoint]> {
        self.get(key).and_then(FeatureValue::as_series)
    }

    pub fn points(&self, key: &str) -> Option<&[SpatialPoint]> {
        self.get(key).and_then(FeatureValue::as_points)
    }

    pub fn require_series(&self, key: &str) -> Result<&[TimePoint]> {
        self.series(key)
            .ok_or_else(|| PipelineError::malformed(format!("missing series feature '{}'", key)))
    }

    pub fn require_points(&self, key: &str) -> Result<&[SpatialPoint]> {
        self.points(key)
            .ok_or_else(|| PipelineError::malformed(format!("missing point feature '{}'", key)))
    }

    /// Chained scalar published by an upstream model, if it ran
    pub fn upstream_scalar(&self, model: ModelId, field: &str) -> Option<f64> {
        self.scalar(&Self::upstream_key(model, field))
    }

    pub fn upstream_series(&self, model: ModelId, field: &str) -> Option<&[TimePoint]> {
        self.series(&Self::upstream_key(model, field))
    }
}

/// Builder enforcing the domain namespace of adapter-produced keys
pub struct FeatureRecordBuilder {
    domain: Domain,
    features: BTreeMap<String, FeatureValue>,
}

impl FeatureRecordBuilder {
    pub fn insert(mut self, key: &str, value: FeatureValue) -> Self {
        debug_assert!(
            key.starts_with(self.domain.as_str()) && !key.starts_with(UPSTREAM_PREFIX),
            "key {} outside domain {}",
            key,
            self.domain
        );
        self.features.insert(key.to_string(), value);
        self
    }

    pub fn insert_series(self, key: &str, series: Vec<TimePoint>) -> Self {
        self.insert(key, FeatureValue::Series(series))
    }

    /// Inserts the series only when it has at least one point
    pub fn insert_nonempty(self, key: &str, series: Vec<TimePoint>) -> Self {
        if series.is_empty() {
            self
        } else {
            self.insert_series(key, series)
        }
    }

    pub fn insert_scalar(self, key: &str, value: f64) -> Self {
        self.insert(key, FeatureValue::Scalar(value))
    }

    pub fn insert_points(self, key: &str, points: Vec<SpatialPoint>) -> Self {
        self.insert(key, FeatureValue::Points(points))
    }

    pub fn build(self) -> FeatureRecord {
        let mut domains = BTreeSet::new();
        domains.insert(self.domain);
        FeatureRecord {
            domains,
            features: self.features,
        }
    }
}

/// Value of a series at the timestamp nearest to `ts`, within `tolerance_secs`
pub fn nearest_value(series: &[TimePoint], ts: i64, tolerance_secs: i64) -> Option<f64> {
    if series.is_empty() {
        return None;
    }
    let idx = series.partition_point(|p| p.timestamp < ts);
    let mut best: Option<&TimePoint> = None;
    for candidate in [idx.checked_sub(1), Some(idx)].into_iter().flatten() {
        if let Some(p) = series.get(candidate) {
            let better = match best {
                None => true,
                Some(b) => (p.timestamp - ts).abs() < (b.timestamp - ts).abs(),
            };
            if better {
                best = Some(p);
            }
        }
    }
    best.filter(|p| (p.timestamp - ts).abs() <= tolerance_secs)
        .map(|p| p.value)
}
