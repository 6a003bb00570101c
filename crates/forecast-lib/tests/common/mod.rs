//! Shared payload fixtures for pipeline integration tests

#![allow(dead_code)]

use forecast_lib::{Domain, ForecastPipeline, PipelineConfig, RawPayloads};
use serde_json::{json, Value};

/// 2023-11-15T00:00:00Z
pub const TRAFFIC_START: i64 = 1_700_006_400;
/// 2024-01-01T00:00:00Z (a Monday)
pub const ENERGY_START: i64 = 1_704_067_200;

pub fn pipeline() -> ForecastPipeline {
    let mut config = PipelineConfig::default();
    config.params.traffic.n_trees = 25;
    ForecastPipeline::new(config).expect("default config is valid")
}

fn noise(i: usize) -> f64 {
    ((i as f64 * 12.9898).sin() * 43758.5453).fract() * 2.0 - 1.0
}

pub fn traffic_payload(hours: i64) -> Value {
    let observations: Vec<Value> = (0..hours)
        .map(|h| {
            let hour = (h % 24) as f64;
            let flow = 400.0 + 300.0 * ((hour - 6.0) / 24.0 * std::f64::consts::TAU).sin().max(0.0);
            json!({ "timestamp": TRAFFIC_START + h * 3600, "flow": flow, "speed": 45.0 })
        })
        .collect();
    json!({ "observations": observations })
}

/// Covers the traffic history and the 24 hours after it
pub fn weather_payload(hours: i64) -> Value {
    let observations: Vec<Value> = (0..hours)
        .map(|h| {
            json!({
                "timestamp": TRAFFIC_START + h * 3600,
                "temperature": 10.0 + 5.0 * ((h % 24) as f64 / 24.0 * std::f64::consts::TAU).sin(),
                "precipitation": 0.0,
                "visibility": 10.0,
                "humidity": 60.0,
                "wind_speed": 3.5,
            })
        })
        .collect();
    json!({ "observations": observations })
}

pub fn aqi_payload(days: usize) -> Value {
    let observations: Vec<Value> = (0..days)
        .map(|d| {
            json!({
                "timestamp": 1_700_000_000 + d as i64 * 86_400,
                "aqi": 60.0 + 8.0 * noise(d),
                "pm25": 12.5,
            })
        })
        .collect();
    json!({ "observations": observations })
}

/// Ten yearly records ending in 2024 with population growing linearly
/// by `yearly_share` of the 2015 population
pub fn demographic_payload(yearly_share: f64) -> Value {
    let records: Vec<Value> = (0..10)
        .map(|i| {
            let f = i as f64;
            json!({
                "year": 2015 + i,
                "population": 100_000.0 * (1.0 + yearly_share * f),
                "built_area": 100.0 * 1.015f64.powf(f),
                "gdp": 5_000.0 * 1.03f64.powf(f),
                "employment_rate": 0.9 + 0.005 * (f * 0.9).cos(),
            })
        })
        .collect();
    json!({ "records": records })
}

/// One week of hourly demand with a midday peak
pub fn energy_payload() -> Value {
    let observations: Vec<Value> = (0..24 * 7)
        .map(|h: i64| {
            let phase = (h % 24) as f64 / 24.0 * std::f64::consts::TAU;
            let demand = 1_000.0 + 0.5 * h as f64 + 200.0 * (phase - std::f64::consts::FRAC_PI_2).sin();
            json!({ "timestamp": ENERGY_START + h * 3600, "demand": demand })
        })
        .collect();
    json!({ "observations": observations })
}

pub fn traffic_and_weather() -> RawPayloads {
    RawPayloads::new()
        .with(Domain::Traffic, traffic_payload(48))
        .with(Domain::Weather, weather_payload(72))
}

/// Forty scattered incidents plus twenty in one dense, severe cell
pub fn incident_payload() -> Value {
    let week_start = 1_699_833_600i64;
    let scattered = (0..40).map(|i: i64| {
        json!({
            "lat": 40.0 + i as f64 * 0.02,
            "lon": -74.0,
            "timestamp": week_start + i * 3600,
            "category": if i % 3 == 0 { "Theft" } else { "vandalism" },
            "severity": 1.0 + (i % 2) as f64,
        })
    });
    let dense = (0..20).map(|i: i64| {
        json!({
            "lat": 40.5011,
            "lon": -74.2011,
            "timestamp": week_start + i * 1800,
            "category": if i % 2 == 0 { "assault" } else { "robbery" },
            "severity": 4.0,
        })
    });
    json!({ "incidents": scattered.chain(dense).collect::<Vec<_>>() })
}

/// Three demand blobs about 5 km apart plus one isolated point
pub fn mobility_payload() -> Value {
    let centres = [(40.70, -74.00), (40.75, -74.00), (40.70, -73.94)];
    let mut demand_points = Vec::new();
    for (lat, lon) in centres {
        for k in 0..6 {
            demand_points.push(json!({
                "lat": lat + (k / 3) as f64 * 0.001,
                "lon": lon + (k % 3) as f64 * 0.001,
                "demand": 120.0,
            }));
        }
    }
    demand_points.push(json!({ "lat": 41.5, "lon": -75.0, "demand": 120.0 }));
    json!({
        "demand_points": demand_points,
        "existing_stops": [
            { "lat": 40.70, "lon": -74.00, "capacity": 50.0 },
            { "lat": 40.75, "lon": -74.00 }
        ]
    })
}

/// 4 x 6 parcel grid: residential west, commercial east, one green and one
/// industrial corner
pub fn parcel_payload() -> Value {
    let mut parcels = Vec::new();
    for row in 0..4 {
        for col in 0..6 {
            let current_use = match (row, col) {
                (0, 0) => "green",
                (3, 5) => "industrial",
                (_, c) if c < 3 => "residential",
                _ => "commercial",
            };
            parcels.push(json!({
                "id": format!("p-{}-{}", row, col),
                "lat": 40.70 + row as f64 * 0.002,
                "lon": -74.0 + col as f64 * 0.004,
                "current_use": current_use,
                "area_sqm": 1_000.0,
                "value": 250_000.0,
            }));
        }
    }
    json!({
        "parcels": parcels,
        "transit_stops": [{ "lat": 40.703, "lon": -73.99 }]
    })
}

pub fn demographic_payload_with_density(yearly_share: f64, density_per_km2: f64) -> Value {
    let mut payload = demographic_payload(yearly_share);
    payload["density_per_km2"] = json!(density_per_km2);
    payload
}
