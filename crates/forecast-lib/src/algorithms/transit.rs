//! Transit stop placement from clustered demand
//!
//! Demand points are clustered with DBSCAN over haversine distance. Each
//! cluster becomes one proposed stop at its demand-weighted centroid, with a
//! headway stepped down as demand density rises. Points DBSCAN labels as
//! noise are reported as a coverage gap.

use serde::{Deserialize, Serialize};

use super::output::{ModelOutput, ModelResult, Reliability, GROWTH_FACTOR};
use crate::error::{PipelineError, Result};
use crate::estimators::dbscan::{cluster_count, dbscan, haversine_km, tune_eps, NOISE};
use crate::features::{keys, FeatureRecord};
use crate::models::{Horizon, ModelId, SpatialPoint};

/// `(minimum density per km², headway minutes)`, densest first
const HEADWAY_STEPS: [(f64, u32); 3] = [(1_000.0, 5), (500.0, 10), (100.0, 15)];
const BASE_HEADWAY_MINUTES: u32 = 30;

const EXPRESS_ROUTE_STOP_COUNT: usize = 20;
const HIGH_DEMAND_STOP: f64 = 500.0;
const FEEDER_AREA_KM2: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitParams {
    /// Fixed neighbourhood radius; bypasses tuning when set
    pub eps_km: Option<f64>,
    pub eps_candidates_km: Vec<f64>,
    /// Defaults to `max(3, ceil(5% of points))`
    pub min_samples: Option<usize>,
    /// Floor applied to the coverage area when computing density
    pub min_area_km2: f64,
}

impl Default for TransitParams {
    fn default() -> Self {
        Self {
            eps_km: None,
            eps_candidates_km: vec![0.5, 1.0, 1.5, 2.0],
            min_samples: None,
            min_area_km2: 0.25,
        }
    }
}

impl TransitParams {
    pub fn resolve_min_samples(&self, points: usize) -> usize {
        self.min_samples
            .unwrap_or_else(|| 3.max((points as f64 * 0.05).ceil() as usize))
            .max(1)
    }
}

/// Headway for a demand density, non-increasing in density
pub fn headway_minutes(density_per_km2: f64) -> u32 {
    HEADWAY_STEPS
        .iter()
        .find(|(threshold, _)| density_per_km2 >= *threshold)
        .map(|(_, minutes)| *minutes)
        .unwrap_or(BASE_HEADWAY_MINUTES)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposedStop {
    pub stop_id: String,
    pub lat: f64,
    pub lon: f64,
    pub expected_demand: f64,
    pub future_demand: f64,
    pub coverage_area_km2: f64,
    pub demand_density: f64,
    pub headway_minutes: u32,
    pub frequency: String,
    pub member_points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageGap {
    pub unclustered_points: usize,
    pub unserved_demand: f64,
    pub unserved_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitPlan {
    pub stops: Vec<ProposedStop>,
    pub coverage_gap: CoverageGap,
    pub route_efficiency: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub served_population: Option<f64>,
    pub growth_factor: f64,
    pub eps_km: f64,
    pub min_samples: usize,
    pub recommendations: Vec<String>,
}

/// Bounding box of the members in km², zero below three points
fn coverage_area_km2(members: &[&SpatialPoint]) -> f64 {
    if members.len() < 3 {
        return 0.0;
    }
    let (mut min_lat, mut max_lat) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_lon, mut max_lon) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in members {
        min_lat = min_lat.min(p.lat);
        max_lat = max_lat.max(p.lat);
        min_lon = min_lon.min(p.lon);
        max_lon = max_lon.max(p.lon);
    }
    let mid_lat = (min_lat + max_lat) / 2.0;
    let mid_lon = (min_lon + max_lon) / 2.0;
    haversine_km(min_lat, mid_lon, max_lat, mid_lon) * haversine_km(mid_lat, min_lon, mid_lat, max_lon)
}

fn weighted_centroid(members: &[&SpatialPoint]) -> (f64, f64) {
    let total: f64 = members.iter().map(|p| p.weight).sum();
    if total > 0.0 {
        (
            members.iter().map(|p| p.lat * p.weight).sum::<f64>() / total,
            members.iter().map(|p| p.lon * p.weight).sum::<f64>() / total,
        )
    } else {
        let n = members.len() as f64;
        (
            members.iter().map(|p| p.lat).sum::<f64>() / n,
            members.iter().map(|p| p.lon).sum::<f64>() / n,
        )
    }
}

fn recommendations(stops: &[ProposedStop]) -> Vec<String> {
    let mut out = Vec::new();
    if stops.len() > EXPRESS_ROUTE_STOP_COUNT {
        out.push("Consider implementing express routes for high-demand corridors".to_string());
    }
    let high_demand = stops
        .iter()
        .filter(|s| s.expected_demand > HIGH_DEMAND_STOP)
        .count();
    if high_demand > 0 {
        out.push(format!(
            "Prioritize {} high-demand stops for immediate implementation",
            high_demand
        ));
    }
    let small_areas = stops
        .iter()
        .filter(|s| s.coverage_area_km2 < FEEDER_AREA_KM2)
        .count();
    if small_areas > 0 {
        out.push(format!(
            "Add feeder routes for {} areas with limited coverage",
            small_areas
        ));
    }
    out
}

pub fn fit_and_forecast(record: &FeatureRecord, _horizon: Horizon, params: &TransitParams) -> Result<ModelResult> {
    let demand = record.require_points(keys::MOBILITY_DEMAND_POINTS)?;
    if demand.is_empty() {
        return Err(PipelineError::insufficient("demand points", 1, 0));
    }
    let coords: Vec<(f64, f64)> = demand.iter().map(|p| (p.lat, p.lon)).collect();
    let min_samples = params.resolve_min_samples(demand.len());

    let (eps_km, eps_counts) = match params.eps_km {
        Some(eps) if eps > 0.0 => (eps, Vec::new()),
        Some(eps) => {
            return Err(PipelineError::malformed(format!(
                "transit eps_km must be positive, got {}",
                eps
            )))
        }
        None => {
            let selection = tune_eps(&coords, &params.eps_candidates_km, min_samples)
                .ok_or_else(|| PipelineError::fit("no positive eps candidates configured"))?;
            (selection.eps_km, selection.counts)
        }
    };

    let labels = dbscan(&coords, eps_km, min_samples);
    let clusters = cluster_count(&labels);
    if clusters == 0 {
        return Err(PipelineError::fit(format!(
            "no demand clusters at eps {} km with min_samples {}",
            eps_km, min_samples
        )));
    }

    let growth_factor = record
        .upstream_scalar(ModelId::UrbanGrowth, GROWTH_FACTOR)
        .filter(|f| f.is_finite() && *f > 0.0)
        .unwrap_or(1.0);

    let mut stops = Vec::with_capacity(clusters);
    for cluster in 0..clusters as i32 {
        let members: Vec<&SpatialPoint> = demand
            .iter()
            .zip(&labels)
            .filter(|(_, label)| **label == cluster)
            .map(|(p, _)| p)
            .collect();
        if members.is_empty() {
            continue;
        }
        let (lat, lon) = weighted_centroid(&members);
        let expected_demand: f64 = members.iter().map(|p| p.weight).sum();
        let future_demand = expected_demand * growth_factor;
        let area = coverage_area_km2(&members);
        let effective_area = area.max(params.min_area_km2);
        let headway = headway_minutes(future_demand / effective_area);
        stops.push(ProposedStop {
            stop_id: format!("stop-{}", stops.len() + 1),
            lat,
            lon,
            expected_demand,
            future_demand,
            coverage_area_km2: area,
            demand_density: expected_demand / effective_area,
            headway_minutes: headway,
            frequency: format!("Every {} minutes", headway),
            member_points: members.len(),
        });
    }

    let total_demand: f64 = demand.iter().map(|p| p.weight).sum();
    let unclustered: Vec<&SpatialPoint> = demand
        .iter()
        .zip(&labels)
        .filter(|(_, label)| **label == NOISE)
        .map(|(p, _)| p)
        .collect();
    let unserved_demand: f64 = unclustered.iter().map(|p| p.weight).sum();
    let coverage_gap = CoverageGap {
        unclustered_points: unclustered.len(),
        unserved_demand,
        unserved_share: if total_demand > 0.0 {
            unserved_demand / total_demand
        } else {
            0.0
        },
    };

    let existing = record
        .points(keys::MOBILITY_EXISTING_STOPS)
        .map(|s| s.len())
        .unwrap_or(0);
    let route_efficiency = if existing == 0 {
        100.0
    } else {
        (stops.len() as f64 / existing as f64 * 100.0).min(100.0)
    };

    let served_population = record.scalar(keys::DEMOGRAPHIC_DENSITY).map(|density| {
        let area: f64 = stops
            .iter()
            .map(|s| s.coverage_area_km2.max(params.min_area_km2))
            .sum();
        (density * area).round()
    });

    let clustered_share = 1.0 - unclustered.len() as f64 / demand.len() as f64;
    let mut reliability = Reliability::default()
        .with_extra("eps_km", eps_km)
        .with_extra("min_samples", min_samples as f64)
        .with_extra("clusters", clusters as f64)
        .with_extra("noise_points", unclustered.len() as f64);
    for (eps, count) in &eps_counts {
        reliability = reliability.with_extra(&format!("clusters_at_{}km", eps), *count as f64);
    }

    let output = TransitPlan {
        recommendations: recommendations(&stops),
        stops,
        coverage_gap,
        route_efficiency,
        served_population,
        growth_factor,
        eps_km,
        min_samples,
    };
    Ok(ModelResult::new(
        ModelId::Transit,
        ModelOutput::Transit(output),
        reliability,
        clustered_share,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Domain, FeatureValue};

    fn three_blobs(demand: f64) -> Vec<SpatialPoint> {
        let centres = [(40.70, -74.00), (40.75, -74.00), (40.70, -73.94)];
        let mut points = Vec::new();
        for (lat, lon) in centres {
            for k in 0..6 {
                let dx = (k % 3) as f64 * 0.001;
                let dy = (k / 3) as f64 * 0.001;
                points.push(SpatialPoint::new(lat + dy, lon + dx, demand));
            }
        }
        points.push(SpatialPoint::new(41.5, -75.0, demand));
        points
    }

    fn mobility_record(demand: f64) -> FeatureRecord {
        FeatureRecord::builder(Domain::Mobility)
            .insert_points(keys::MOBILITY_DEMAND_POINTS, three_blobs(demand))
            .insert_points(
                keys::MOBILITY_EXISTING_STOPS,
                vec![SpatialPoint::new(40.7, -74.0, 1.0); 6],
            )
            .build()
    }

    fn plan_of(result: &ModelResult) -> &TransitPlan {
        match &result.output {
            ModelOutput::Transit(plan) => plan,
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_headway_non_increasing_in_density() {
        let mut previous = u32::MAX;
        for density in (0..3000).step_by(50) {
            let h = headway_minutes(density as f64);
            assert!(h <= previous);
            previous = h;
        }
        assert_eq!(headway_minutes(99.0), 30);
        assert_eq!(headway_minutes(100.0), 15);
        assert_eq!(headway_minutes(1_000.0), 5);
    }

    #[test]
    fn test_default_min_samples() {
        let params = TransitParams::default();
        assert_eq!(params.resolve_min_samples(10), 3);
        assert_eq!(params.resolve_min_samples(200), 10);
    }

    #[test]
    fn test_stops_per_cluster_and_gap() {
        let result = fit_and_forecast(&mobility_record(40.0), Horizon::NotApplicable, &TransitParams::default()).unwrap();
        let plan = plan_of(&result);
        assert_eq!(plan.stops.len(), 3);
        assert_eq!(plan.coverage_gap.unclustered_points, 1);
        assert!((plan.coverage_gap.unserved_demand - 40.0).abs() < 1e-9);
        assert!((plan.route_efficiency - 50.0).abs() < 1e-9);
        assert!(plan.served_population.is_none());
        for stop in &plan.stops {
            assert_eq!(stop.member_points, 6);
            assert!((stop.expected_demand - 240.0).abs() < 1e-9);
            assert_eq!(stop.frequency, format!("Every {} minutes", stop.headway_minutes));
        }
        assert!((result.confidence - 18.0 / 19.0).abs() < 1e-9);
        assert!(plan
            .recommendations
            .iter()
            .any(|r| r.starts_with("Add feeder routes for 3")));
    }

    #[test]
    fn test_growth_factor_scales_future_demand() {
        let record = mobility_record(40.0)
            .with_injected(ModelId::UrbanGrowth, GROWTH_FACTOR, FeatureValue::Scalar(2.0))
            .unwrap();
        let result = fit_and_forecast(&record, Horizon::NotApplicable, &TransitParams::default()).unwrap();
        let plan = plan_of(&result);
        assert_eq!(plan.growth_factor, 2.0);
        for stop in &plan.stops {
            assert!((stop.future_demand - 2.0 * stop.expected_demand).abs() < 1e-9);
        }
    }

    #[test]
    fn test_scattered_points_are_fit_error() {
        let points: Vec<SpatialPoint> = (0..10)
            .map(|i| SpatialPoint::new(40.0 + i as f64 * 0.5, -74.0, 10.0))
            .collect();
        let record = FeatureRecord::builder(Domain::Mobility)
            .insert_points(keys::MOBILITY_DEMAND_POINTS, points)
            .build();
        let err = fit_and_forecast(&record, Horizon::NotApplicable, &TransitParams::default()).unwrap_err();
        assert!(matches!(err, PipelineError::ModelFit(_)));
    }
}
