//! Payload normalization
//!
//! Turns one raw JSON payload per domain into a [`FeatureRecord`]:
//! - serde deserialization into the domain schema
//! - timestamp parsing, sorting and de-duplication (last value wins)
//! - unit normalization (°C, persons, MW)
//! - minimum history enforcement

use chrono::{DateTime, Datelike, Weekday};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::keys;
use super::payloads::{
    year_start, AqiPayload, DemographicPayload, EnergyPayload, IncidentPayload, MobilityPayload,
    ParcelPayload, TrafficPayload, WeatherPayload,
};
use super::FeatureRecord;
use crate::error::{PipelineError, Result};
use crate::models::{Domain, SpatialPoint, TimePoint};

/// Minimum observations per domain before a record is usable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryRequirements {
    /// Hourly traffic observations
    pub traffic: usize,
    /// Daily AQI observations (two weekly cycles)
    pub aqi: usize,
    /// Hourly demand observations (two daily cycles)
    pub energy: usize,
    /// Yearly demographic records
    pub demographic: usize,
    pub mobility: usize,
    pub incident: usize,
    pub parcel: usize,
}

impl Default for HistoryRequirements {
    fn default() -> Self {
        Self {
            traffic: 30,
            aqi: 14,
            energy: 48,
            demographic: 5,
            mobility: 10,
            incident: 50,
            parcel: 20,
        }
    }
}

impl HistoryRequirements {
    pub fn minimum(&self, domain: Domain) -> usize {
        match domain {
            Domain::Traffic => self.traffic,
            Domain::Aqi => self.aqi,
            Domain::Energy => self.energy,
            Domain::Demographic => self.demographic,
            Domain::Mobility => self.mobility,
            Domain::Incident => self.incident,
            Domain::Parcel => self.parcel,
            Domain::Weather => 0,
        }
    }
}

/// Normalizes raw domain payloads into feature records
#[derive(Debug, Clone, Default)]
pub struct FeatureAdapter {
    requirements: HistoryRequirements,
}

impl FeatureAdapter {
    pub fn new(requirements: HistoryRequirements) -> Self {
        Self { requirements }
    }

    pub fn requirements(&self) -> &HistoryRequirements {
        &self.requirements
    }

    /// Build the feature record for one domain payload. Pure transform.
    pub fn prepare(&self, domain: Domain, payload: &serde_json::Value) -> Result<FeatureRecord> {
        match domain {
            Domain::Traffic => self.prepare_traffic(parse(domain, payload)?),
            Domain::Weather => self.prepare_weather(parse(domain, payload)?),
            Domain::Aqi => self.prepare_aqi(parse(domain, payload)?),
            Domain::Demographic => self.prepare_demographic(parse(domain, payload)?),
            Domain::Energy => self.prepare_energy(parse(domain, payload)?),
            Domain::Incident => self.prepare_incident(parse(domain, payload)?),
            Domain::Mobility => self.prepare_mobility(parse(domain, payload)?),
            Domain::Parcel => self.prepare_parcel(parse(domain, payload)?),
        }
    }

    fn check_history(&self, domain: Domain, subject: &str, actual: usize) -> Result<()> {
        let required = self.requirements.minimum(domain);
        if actual < required {
            return Err(PipelineError::insufficient(subject, required, actual));
        }
        Ok(())
    }

    fn prepare_traffic(&self, payload: TrafficPayload) -> Result<FeatureRecord> {
        let mut flow = SeriesBuilder::new("traffic.flow");
        let mut speed = SeriesBuilder::new("traffic.speed");
        let mut occupancy = SeriesBuilder::new("traffic.occupancy");
        for obs in &payload.observations {
            let ts = obs.timestamp.to_unix()?;
            flow.push(ts, non_negative("traffic.flow", obs.flow)?);
            speed.push_opt(ts, obs.speed)?;
            occupancy.push_opt(ts, obs.occupancy)?;
        }

        let mut events = SeriesBuilder::new("traffic.event_hours");
        for event in &payload.events {
            let start = event.timestamp.to_unix()?;
            let impact = finite("traffic.event_impact", event.impact.unwrap_or(1.0))?;
            for hour in 0..event.duration_hours.max(1) {
                events.push(start + i64::from(hour) * 3600, impact);
            }
        }

        let flow = flow.finish();
        self.check_history(Domain::Traffic, "traffic observations", flow.len())?;

        Ok(FeatureRecord::builder(Domain::Traffic)
            .insert_series(keys::TRAFFIC_FLOW, flow)
            .insert_nonempty(keys::TRAFFIC_SPEED, speed.finish())
            .insert_nonempty(keys::TRAFFIC_OCCUPANCY, occupancy.finish())
            .insert_nonempty(keys::TRAFFIC_EVENT_HOURS, events.finish())
            .build())
    }

    fn prepare_weather(&self, payload: WeatherPayload) -> Result<FeatureRecord> {
        let unit = payload.temperature_unit;
        let mut temperature = SeriesBuilder::new("weather.temperature");
        let mut precipitation = SeriesBuilder::new("weather.precipitation");
        let mut visibility = SeriesBuilder::new("weather.visibility");
        let mut humidity = SeriesBuilder::new("weather.humidity");
        let mut wind = SeriesBuilder::new("weather.wind_speed");
        for obs in &payload.observations {
            let ts = obs.timestamp.to_unix()?;
            temperature.push_opt(ts, obs.temperature.map(|t| unit.to_celsius(t)))?;
            precipitation.push_opt(ts, obs.precipitation)?;
            visibility.push_opt(ts, obs.visibility)?;
            humidity.push_opt(ts, obs.humidity)?;
            wind.push_opt(ts, obs.wind_speed)?;
        }

        Ok(FeatureRecord::builder(Domain::Weather)
            .insert_nonempty(keys::WEATHER_TEMPERATURE, temperature.finish())
            .insert_nonempty(keys::WEATHER_PRECIPITATION, precipitation.finish())
            .insert_nonempty(keys::WEATHER_VISIBILITY, visibility.finish())
            .insert_nonempty(keys::WEATHER_HUMIDITY, humidity.finish())
            .insert_nonempty(keys::WEATHER_WIND_SPEED, wind.finish())
            .build())
    }

    fn prepare_aqi(&self, payload: AqiPayload) -> Result<FeatureRecord> {
        let mut index = SeriesBuilder::new("aqi.index");
        let mut pm25 = SeriesBuilder::new("aqi.pm25");
        let mut pm10 = SeriesBuilder::new("aqi.pm10");
        let mut o3 = SeriesBuilder::new("aqi.o3");
        let mut no2 = SeriesBuilder::new("aqi.no2");
        for obs in &payload.observations {
            let ts = obs.timestamp.to_unix()?;
            index.push(ts, non_negative("aqi.index", obs.aqi)?);
            pm25.push_opt(ts, obs.pm25)?;
            pm10.push_opt(ts, obs.pm10)?;
            o3.push_opt(ts, obs.o3)?;
            no2.push_opt(ts, obs.no2)?;
        }

        let index = index.finish();
        self.check_history(Domain::Aqi, "aqi observations", index.len())?;

        Ok(FeatureRecord::builder(Domain::Aqi)
            .insert_series(keys::AQI_INDEX, index)
            .insert_nonempty(keys::AQI_PM25, pm25.finish())
            .insert_nonempty(keys::AQI_PM10, pm10.finish())
            .insert_nonempty(keys::AQI_O3, o3.finish())
            .insert_nonempty(keys::AQI_NO2, no2.finish())
            .build())
    }

    fn prepare_demographic(&self, payload: DemographicPayload) -> Result<FeatureRecord> {
        let unit = payload.population_unit;
        let mut population = SeriesBuilder::new("demographic.population");
        let mut built_area = SeriesBuilder::new("demographic.built_area");
        let mut gdp = SeriesBuilder::new("demographic.gdp");
        let mut employment = SeriesBuilder::new("demographic.employment_rate");
        for record in &payload.records {
            let ts = year_start(record.year)?;
            let persons = unit.to_persons(non_negative("demographic.population", record.population)?);
            population.push(ts, persons);
            built_area.push(ts, non_negative("demographic.built_area", record.built_area)?);
            gdp.push(ts, finite("demographic.gdp", record.gdp)?);
            employment.push(ts, finite("demographic.employment_rate", record.employment_rate)?);
        }

        let population = population.finish();
        self.check_history(Domain::Demographic, "demographic records", population.len())?;

        let mut builder = FeatureRecord::builder(Domain::Demographic)
            .insert_series(keys::DEMOGRAPHIC_POPULATION, population)
            .insert_series(keys::DEMOGRAPHIC_BUILT_AREA, built_area.finish())
            .insert_series(keys::DEMOGRAPHIC_GDP, gdp.finish())
            .insert_series(keys::DEMOGRAPHIC_EMPLOYMENT, employment.finish());
        if let Some(density) = payload.density_per_km2 {
            builder = builder.insert_scalar(
                keys::DEMOGRAPHIC_DENSITY,
                non_negative("demographic.density_per_km2", density)?,
            );
        }
        Ok(builder.build())
    }

    fn prepare_energy(&self, payload: EnergyPayload) -> Result<FeatureRecord> {
        let mut demand = SeriesBuilder::new("energy.demand");
        let mut temperature = SeriesBuilder::new("energy.temperature");
        let mut day_type = SeriesBuilder::new("energy.day_type");
        for obs in &payload.observations {
            let ts = obs.timestamp.to_unix()?;
            let mw = payload
                .demand_unit
                .to_mw(non_negative("energy.demand", obs.demand)?);
            demand.push(ts, mw);
            temperature.push_opt(
                ts,
                obs.temperature.map(|t| payload.temperature_unit.to_celsius(t)),
            )?;
            let code = match obs.day_type {
                Some(kind) => kind.code(),
                None => calendar_day_type(ts),
            };
            day_type.push(ts, code);
        }

        let demand = demand.finish();
        self.check_history(Domain::Energy, "energy observations", demand.len())?;

        Ok(FeatureRecord::builder(Domain::Energy)
            .insert_series(keys::ENERGY_DEMAND, demand)
            .insert_nonempty(keys::ENERGY_TEMPERATURE, temperature.finish())
            .insert_series(keys::ENERGY_DAY_TYPE, day_type.finish())
            .build())
    }

    fn prepare_incident(&self, payload: IncidentPayload) -> Result<FeatureRecord> {
        let mut points = Vec::with_capacity(payload.incidents.len());
        for incident in &payload.incidents {
            check_coordinates("incident", incident.lat, incident.lon)?;
            let mut point = SpatialPoint::new(
                incident.lat,
                incident.lon,
                non_negative("incident.severity", incident.severity)?,
            )
            .with_timestamp(incident.timestamp.to_unix()?);
            if let Some(category) = &incident.category {
                point = point.with_label(category.trim().to_ascii_lowercase());
            }
            points.push(point);
        }
        self.check_history(Domain::Incident, "incidents", points.len())?;

        Ok(FeatureRecord::builder(Domain::Incident)
            .insert_points(keys::INCIDENT_POINTS, points)
            .build())
    }

    fn prepare_mobility(&self, payload: MobilityPayload) -> Result<FeatureRecord> {
        let mut demand_points = Vec::with_capacity(payload.demand_points.len());
        for point in &payload.demand_points {
            check_coordinates("mobility", point.lat, point.lon)?;
            demand_points.push(SpatialPoint::new(
                point.lat,
                point.lon,
                non_negative("mobility.demand", point.demand)?,
            ));
        }
        self.check_history(Domain::Mobility, "demand points", demand_points.len())?;

        let mut stops = Vec::with_capacity(payload.existing_stops.len());
        for stop in &payload.existing_stops {
            check_coordinates("mobility", stop.lat, stop.lon)?;
            stops.push(SpatialPoint::new(
                stop.lat,
                stop.lon,
                non_negative("mobility.stop_capacity", stop.capacity.unwrap_or(1.0))?,
            ));
        }

        let mut builder = FeatureRecord::builder(Domain::Mobility)
            .insert_points(keys::MOBILITY_DEMAND_POINTS, demand_points);
        if !stops.is_empty() {
            builder = builder.insert_points(keys::MOBILITY_EXISTING_STOPS, stops);
        }
        Ok(builder.build())
    }

    fn prepare_parcel(&self, payload: ParcelPayload) -> Result<FeatureRecord> {
        let mut parcels = Vec::with_capacity(payload.parcels.len());
        for (i, parcel) in payload.parcels.iter().enumerate() {
            check_coordinates("parcel", parcel.lat, parcel.lon)?;
            let id = parcel
                .id
                .clone()
                .unwrap_or_else(|| format!("parcel-{}", i + 1));
            parcels.push(
                SpatialPoint::new(
                    parcel.lat,
                    parcel.lon,
                    non_negative("parcel.area_sqm", parcel.area_sqm)?,
                )
                .with_label(parcel.current_use.as_str())
                .with_magnitude(non_negative("parcel.value", parcel.value)?)
                .with_id(id),
            );
        }
        self.check_history(Domain::Parcel, "parcels", parcels.len())?;

        let mut stops = Vec::with_capacity(payload.transit_stops.len());
        for stop in &payload.transit_stops {
            check_coordinates("parcel", stop.lat, stop.lon)?;
            stops.push(SpatialPoint::new(stop.lat, stop.lon, 1.0));
        }

        let mut builder =
            FeatureRecord::builder(Domain::Parcel).insert_points(keys::PARCEL_PARCELS, parcels);
        if !stops.is_empty() {
            builder = builder.insert_points(keys::PARCEL_TRANSIT_STOPS, stops);
        }

        let goals = &payload.development_goals;
        if let Some(units) = goals.housing_units {
            builder = builder.insert_scalar(
                keys::PARCEL_GOAL_HOUSING_UNITS,
                non_negative("parcel.goal.housing_units", units)?,
            );
        }
        if let Some(jobs) = goals.jobs {
            builder =
                builder.insert_scalar(keys::PARCEL_GOAL_JOBS, non_negative("parcel.goal.jobs", jobs)?);
        }
        if let Some(green) = goals.green_space_sqm {
            builder = builder.insert_scalar(
                keys::PARCEL_GOAL_GREEN_SPACE,
                non_negative("parcel.goal.green_space_sqm", green)?,
            );
        }

        for (kind, cap) in &payload.zoning_caps {
            if !(0.0..=1.0).contains(cap) {
                return Err(PipelineError::malformed(format!(
                    "parcel: zoning cap for {} must be a share in [0, 1], got {}",
                    kind, cap
                )));
            }
            let key = format!("{}{}", keys::PARCEL_ZONING_CAP_PREFIX, kind.as_str());
            builder = builder.insert_scalar(&key, *cap);
        }

        Ok(builder.build())
    }
}

fn parse<T: DeserializeOwned>(domain: Domain, payload: &serde_json::Value) -> Result<T> {
    T::deserialize(payload)
        .map_err(|e| PipelineError::malformed(format!("{} payload: {}", domain, e)))
}

fn finite(field: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PipelineError::malformed(format!(
            "{} is not a finite number",
            field
        )))
    }
}

fn non_negative(field: &str, value: f64) -> Result<f64> {
    let value = finite(field, value)?;
    if value < 0.0 {
        return Err(PipelineError::malformed(format!(
            "{} must not be negative, got {}",
            field, value
        )));
    }
    Ok(value)
}

fn check_coordinates(domain: &str, lat: f64, lon: f64) -> Result<()> {
    if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
        return Err(PipelineError::malformed(format!(
            "{}: coordinate ({}, {}) out of range",
            domain, lat, lon
        )));
    }
    Ok(())
}

/// Weekend code for Saturday/Sunday, weekday otherwise
fn calendar_day_type(ts: i64) -> f64 {
    match DateTime::from_timestamp(ts, 0).map(|dt| dt.weekday()) {
        Some(Weekday::Sat) | Some(Weekday::Sun) => 1.0,
        _ => 0.0,
    }
}

/// Collects timestamped values, sorted with duplicates resolved to the last value
struct SeriesBuilder {
    field: &'static str,
    points: BTreeMap<i64, f64>,
}

impl SeriesBuilder {
    fn new(field: &'static str) -> Self {
        Self {
            field,
            points: BTreeMap::new(),
        }
    }

    fn push(&mut self, ts: i64, value: f64) {
        self.points.insert(ts, value);
    }

    fn push_opt(&mut self, ts: i64, value: Option<f64>) -> Result<()> {
        if let Some(v) = value {
            self.push(ts, finite(self.field, v)?);
        }
        Ok(())
    }

    fn finish(self) -> Vec<TimePoint> {
        self.points
            .into_iter()
            .map(|(ts, value)| TimePoint::new(ts, value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hourly_traffic(count: usize) -> serde_json::Value {
        let obs: Vec<_> = (0..count)
            .map(|i| json!({"timestamp": 1_700_000_000 + i as i64 * 3600, "flow": 100.0 + i as f64}))
            .collect();
        json!({ "observations": obs })
    }

    #[test]
    fn test_traffic_record_sorted_and_deduplicated() {
        let adapter = FeatureAdapter::default();
        let mut payload = hourly_traffic(30);
        // duplicate of the first timestamp, appended last: it wins
        payload["observations"]
            .as_array_mut()
            .unwrap()
            .push(json!({"timestamp": 1_700_000_000, "flow": 7.0}));
        let record = adapter.prepare(Domain::Traffic, &payload).unwrap();
        let flow = record.series(keys::TRAFFIC_FLOW).unwrap();
        assert_eq!(flow.len(), 30);
        assert_eq!(flow[0].value, 7.0);
        assert!(flow.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_traffic_events_expand_to_hours() {
        let adapter = FeatureAdapter::default();
        let mut payload = hourly_traffic(30);
        payload["events"] = json!([{"timestamp": "2023-11-14T22:00:00Z", "impact": 0.5}]);
        let record = adapter.prepare(Domain::Traffic, &payload).unwrap();
        let events = record.series(keys::TRAFFIC_EVENT_HOURS).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].timestamp - events[0].timestamp, 3600);
    }

    #[test]
    fn test_insufficient_history() {
        let adapter = FeatureAdapter::default();
        let err = adapter.prepare(Domain::Traffic, &hourly_traffic(10)).unwrap_err();
        assert_eq!(
            err,
            PipelineError::InsufficientHistory {
                subject: "traffic observations".to_string(),
                required: 30,
                actual: 10
            }
        );
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let adapter = FeatureAdapter::default();
        let payload = json!({"observations": [{"timestamp": 0}]});
        let err = adapter.prepare(Domain::Aqi, &payload).unwrap_err();
        match err {
            PipelineError::MalformedInput(msg) => {
                assert!(msg.contains("aqi"));
                assert!(msg.contains("missing field"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unknown_enum_label_is_malformed() {
        let adapter = FeatureAdapter::default();
        let payload = json!({"temperature_unit": "rankine", "observations": []});
        assert!(matches!(
            adapter.prepare(Domain::Weather, &payload),
            Err(PipelineError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_weather_unit_normalization() {
        let adapter = FeatureAdapter::default();
        let payload = json!({
            "temperature_unit": "fahrenheit",
            "observations": [{"timestamp": 0, "temperature": 50.0, "precipitation": 1.2}]
        });
        let record = adapter.prepare(Domain::Weather, &payload).unwrap();
        let temp = record.series(keys::WEATHER_TEMPERATURE).unwrap();
        assert!((temp[0].value - 10.0).abs() < 1e-9);
        assert!(record.series(keys::WEATHER_VISIBILITY).is_none());
    }

    #[test]
    fn test_demographic_population_units() {
        let adapter = FeatureAdapter::default();
        let records: Vec<_> = (0..5)
            .map(|i| {
                json!({"year": 2015 + i, "population": 1.5 + i as f64 * 0.1,
                       "built_area": 100.0, "gdp": 50.0, "employment_rate": 0.9})
            })
            .collect();
        let payload = json!({"population_unit": "millions", "records": records});
        let record = adapter.prepare(Domain::Demographic, &payload).unwrap();
        let pop = record.series(keys::DEMOGRAPHIC_POPULATION).unwrap();
        assert_eq!(pop[0].value, 1_500_000.0);
        assert_eq!(pop[0].timestamp, year_start(2015).unwrap());
    }

    #[test]
    fn test_energy_day_type_defaults_to_calendar() {
        let adapter = FeatureAdapter::new(HistoryRequirements {
            energy: 1,
            ..Default::default()
        });
        // 2023-11-18 is a Saturday
        let payload = json!({
            "demand_unit": "gw",
            "observations": [{"timestamp": "2023-11-18T12:00:00Z", "demand": 1.2}]
        });
        let record = adapter.prepare(Domain::Energy, &payload).unwrap();
        assert_eq!(record.series(keys::ENERGY_DEMAND).unwrap()[0].value, 1200.0);
        assert_eq!(record.series(keys::ENERGY_DAY_TYPE).unwrap()[0].value, 1.0);
    }

    #[test]
    fn test_parcel_zoning_caps_validated() {
        let adapter = FeatureAdapter::new(HistoryRequirements {
            parcel: 1,
            ..Default::default()
        });
        let payload = json!({
            "parcels": [{"lat": 40.0, "lon": -74.0, "current_use": "green", "area_sqm": 500.0, "value": 1.0}],
            "zoning_caps": {"industrial": 1.5}
        });
        assert!(adapter.prepare(Domain::Parcel, &payload).is_err());

        let ok = json!({
            "parcels": [{"lat": 40.0, "lon": -74.0, "current_use": "green", "area_sqm": 500.0, "value": 1.0}],
            "zoning_caps": {"industrial": 0.2}
        });
        let record = adapter.prepare(Domain::Parcel, &ok).unwrap();
        assert_eq!(record.scalar("parcel.zoning_cap.industrial"), Some(0.2));
        let parcels = record.points(keys::PARCEL_PARCELS).unwrap();
        assert_eq!(parcels[0].id.as_deref(), Some("parcel-1"));
        assert_eq!(parcels[0].label.as_deref(), Some("green"));
    }

    #[test]
    fn test_out_of_range_coordinates() {
        let adapter = FeatureAdapter::new(HistoryRequirements {
            mobility: 1,
            ..Default::default()
        });
        let payload = json!({"demand_points": [{"lat": 95.0, "lon": 0.0, "demand": 10.0}]});
        assert!(matches!(
            adapter.prepare(Domain::Mobility, &payload),
            Err(PipelineError::MalformedInput(_))
        ));
    }
}
