//! Land-use mix optimization
//!
//! Parcels are grouped by the use mix of their surroundings with k-means,
//! compared against a target mix derived from development goals, and the
//! parcels whose use is over-represented in their group are proposed for
//! conversion.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::output::{ModelOutput, ModelResult, Reliability, GROWTH_POPULATION_PROJECTION};
use crate::error::{PipelineError, Result};
use crate::estimators::dbscan::haversine_km;
use crate::estimators::kmeans::KMeans;
use crate::features::{keys, FeatureRecord};
use crate::models::{Horizon, LandUseKind, ModelId, SpatialPoint};

type Mix = [f64; 4];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandUseParams {
    pub neighborhood_radius_km: f64,
    pub clusters: usize,
    pub persons_per_household: f64,
    pub sqm_per_housing_unit: f64,
    pub sqm_per_job: f64,
    pub industrial_share: f64,
    pub transit_radius_km: f64,
    pub conversion_threshold: f64,
    pub default_housing_units: f64,
    pub default_jobs: f64,
    pub default_green_space_sqm: f64,
    /// Weights of green ratio, diversity and transit proximity
    pub sustainability_weights: [f64; 3],
}

impl Default for LandUseParams {
    fn default() -> Self {
        Self {
            neighborhood_radius_km: 0.5,
            clusters: 4,
            persons_per_household: 2.5,
            sqm_per_housing_unit: 50.0,
            sqm_per_job: 20.0,
            industrial_share: 0.1,
            transit_radius_km: 0.8,
            conversion_threshold: 0.15,
            default_housing_units: 1_000.0,
            default_jobs: 500.0,
            default_green_space_sqm: 10_000.0,
            sustainability_weights: [0.4, 0.3, 0.3],
        }
    }
}

/// Where the housing target came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HousingSource {
    Goal,
    Upstream,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster: usize,
    pub parcels: usize,
    pub mix: BTreeMap<LandUseKind, f64>,
    pub dominant_use: LandUseKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sustainability {
    /// 0 to 100
    pub score: f64,
    pub green_ratio: f64,
    pub diversity: f64,
    pub transit_proximity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversion {
    pub parcel_id: String,
    pub cluster: usize,
    pub from: LandUseKind,
    pub to: LandUseKind,
    pub delta: f64,
    pub area_sqm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandUsePlan {
    pub current_mix: BTreeMap<LandUseKind, f64>,
    pub optimal_mix: BTreeMap<LandUseKind, f64>,
    pub housing_units_target: f64,
    pub housing_source: HousingSource,
    pub clusters: Vec<ClusterSummary>,
    pub sustainability: Sustainability,
    pub conversions: Vec<Conversion>,
    pub development_priorities: Vec<String>,
}

fn mix_map(mix: &Mix) -> BTreeMap<LandUseKind, f64> {
    LandUseKind::ALL.iter().map(|k| (*k, mix[k.index()])).collect()
}

fn normalize(mix: Mix) -> Mix {
    let total: f64 = mix.iter().sum();
    if total <= 0.0 {
        return [0.25; 4];
    }
    mix.map(|v| v / total)
}

/// Area-weighted use shares of a parcel set
fn area_mix<'a>(parcels: impl Iterator<Item = (&'a SpatialPoint, LandUseKind)>) -> Mix {
    let mut mix = [0.0; 4];
    for (parcel, kind) in parcels {
        mix[kind.index()] += parcel.weight;
    }
    normalize(mix)
}

/// Normalized Shannon entropy of a mix, in [0, 1]
fn diversity(mix: &Mix) -> f64 {
    let entropy: f64 = mix
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| -p * p.ln())
        .sum();
    entropy / (mix.len() as f64).ln()
}

/// Caps shares and hands the excess to uncapped uses in proportion to
/// their share. When the caps cannot absorb the whole mix, the capped
/// shares are rescaled to sum to one.
pub fn apply_caps(shares: Mix, caps: [Option<f64>; 4]) -> Mix {
    let mut shares = normalize(shares);
    let mut fixed = [false; 4];
    for _ in 0..shares.len() {
        let mut excess = 0.0;
        for i in 0..4 {
            if let Some(cap) = caps[i] {
                if !fixed[i] && shares[i] > cap {
                    excess += shares[i] - cap;
                    shares[i] = cap;
                    fixed[i] = true;
                }
            }
        }
        if excess <= 0.0 {
            break;
        }
        let free: Vec<usize> = (0..4).filter(|&i| !fixed[i]).collect();
        if free.is_empty() {
            break;
        }
        let free_total: f64 = free.iter().map(|&i| shares[i]).sum();
        for &i in &free {
            shares[i] += if free_total > 0.0 {
                excess * shares[i] / free_total
            } else {
                excess / free.len() as f64
            };
        }
    }
    normalize(shares)
}

fn parse_uses(parcels: &[SpatialPoint]) -> Result<Vec<LandUseKind>> {
    parcels
        .iter()
        .map(|p| {
            p.label
                .as_deref()
                .ok_or_else(|| PipelineError::malformed("parcel without a current use"))
                .and_then(LandUseKind::from_str)
        })
        .collect()
}

fn housing_target(record: &FeatureRecord, params: &LandUseParams) -> (f64, HousingSource) {
    if let Some(units) = record.scalar(keys::PARCEL_GOAL_HOUSING_UNITS) {
        return (units, HousingSource::Goal);
    }
    let increase = record
        .upstream_series(ModelId::UrbanGrowth, GROWTH_POPULATION_PROJECTION)
        .and_then(|s| Some(s.last()?.value - s.first()?.value));
    match increase {
        Some(increase) if params.persons_per_household > 0.0 => (
            (increase.max(0.0) / params.persons_per_household).round(),
            HousingSource::Upstream,
        ),
        _ => (params.default_housing_units, HousingSource::Default),
    }
}

fn optimal_mix(housing_units: f64, jobs: f64, green_sqm: f64, caps: [Option<f64>; 4], params: &LandUseParams) -> Mix {
    let mut areas = [0.0; 4];
    areas[LandUseKind::Residential.index()] = housing_units * params.sqm_per_housing_unit;
    areas[LandUseKind::Commercial.index()] = jobs * params.sqm_per_job;
    areas[LandUseKind::Green.index()] = green_sqm;
    let others = normalize(areas);
    let industrial = params.industrial_share.clamp(0.0, 1.0);
    let mut mix = others.map(|v| v * (1.0 - industrial));
    if areas.iter().sum::<f64>() <= 0.0 {
        mix = [(1.0 - industrial) / 3.0; 4];
    }
    mix[LandUseKind::Industrial.index()] = industrial;
    apply_caps(mix, caps)
}

fn development_priorities(conversions: &[Conversion], green_goal: f64) -> Vec<String> {
    let mut out = Vec::new();
    if conversions.iter().any(|c| c.to == LandUseKind::Residential) {
        out.push("Priority 1: Increase residential zoning to meet housing targets".to_string());
    }
    if green_goal > 0.0 {
        out.push("Priority 2: Preserve and expand green spaces for sustainability".to_string());
    }
    out.push("Priority 3: Ensure mixed-use development for walkable neighborhoods".to_string());
    out.push("Priority 4: Create transit-oriented development zones".to_string());
    out
}

pub fn fit_and_forecast(
    record: &FeatureRecord,
    _horizon: Horizon,
    params: &LandUseParams,
    seed: u64,
) -> Result<ModelResult> {
    let parcels = record.require_points(keys::PARCEL_PARCELS)?;
    if parcels.is_empty() {
        return Err(PipelineError::insufficient("parcels", 1, 0));
    }
    let uses = parse_uses(parcels)?;

    let descriptors: Vec<Vec<f64>> = parcels
        .iter()
        .map(|centre| {
            area_mix(
                parcels
                    .iter()
                    .zip(uses.iter().copied())
                    .filter(|(p, _)| {
                        haversine_km(centre.lat, centre.lon, p.lat, p.lon) <= params.neighborhood_radius_km
                    }),
            )
            .to_vec()
        })
        .collect();
    let kmeans = KMeans::fit(&descriptors, params.clusters.max(1), seed)?;

    let caps = LandUseKind::ALL.map(|k| {
        record.scalar(&format!("{}{}", keys::PARCEL_ZONING_CAP_PREFIX, k.as_str()))
    });
    let (housing_units, housing_source) = housing_target(record, params);
    let jobs = record
        .scalar(keys::PARCEL_GOAL_JOBS)
        .unwrap_or(params.default_jobs);
    let green_goal = record
        .scalar(keys::PARCEL_GOAL_GREEN_SPACE)
        .unwrap_or(params.default_green_space_sqm);
    let optimal = optimal_mix(housing_units, jobs, green_goal, caps, params);

    let current = area_mix(parcels.iter().zip(uses.iter().copied()));
    let mut clusters = Vec::new();
    let mut conversions = Vec::new();
    for cluster in 0..kmeans.centroids.len() {
        let members: Vec<usize> = (0..parcels.len())
            .filter(|&i| kmeans.labels[i] == cluster)
            .collect();
        if members.is_empty() {
            continue;
        }
        let mix = area_mix(members.iter().map(|&i| (&parcels[i], uses[i])));
        let gap: Vec<f64> = (0..4).map(|u| mix[u] - optimal[u]).collect();
        let (target_idx, deficit) = gap
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, g)| (i, -g))
            .unwrap_or((0, 0.0));
        let dominant = (0..4).max_by(|&a, &b| mix[a].total_cmp(&mix[b])).unwrap_or(0);
        clusters.push(ClusterSummary {
            cluster,
            parcels: members.len(),
            mix: mix_map(&mix),
            dominant_use: LandUseKind::ALL[dominant],
        });

        for &i in &members {
            let from = uses[i];
            let surplus = gap[from.index()];
            if surplus <= 0.0 || from.index() == target_idx {
                continue;
            }
            let delta = surplus + deficit;
            if delta > params.conversion_threshold {
                conversions.push(Conversion {
                    parcel_id: parcels[i].id.clone().unwrap_or_else(|| format!("parcel-{}", i + 1)),
                    cluster,
                    from,
                    to: LandUseKind::ALL[target_idx],
                    delta,
                    area_sqm: parcels[i].weight,
                });
            }
        }
    }
    conversions.sort_by(|a, b| {
        b.delta
            .total_cmp(&a.delta)
            .then_with(|| a.parcel_id.cmp(&b.parcel_id))
    });

    let stops = record.points(keys::PARCEL_TRANSIT_STOPS).unwrap_or(&[]);
    let near_transit = parcels
        .iter()
        .filter(|p| {
            stops
                .iter()
                .any(|s| haversine_km(p.lat, p.lon, s.lat, s.lon) <= params.transit_radius_km)
        })
        .count();
    let transit_proximity = near_transit as f64 / parcels.len() as f64;
    let green_ratio = current[LandUseKind::Green.index()];
    let current_diversity = diversity(&current);
    let [w_green, w_diversity, w_transit] = params.sustainability_weights;
    let sustainability = Sustainability {
        score: (100.0
            * (w_green * green_ratio + w_diversity * current_diversity + w_transit * transit_proximity))
            .clamp(0.0, 100.0),
        green_ratio,
        diversity: current_diversity,
        transit_proximity,
    };

    let total_ss: f64 = {
        let dims = descriptors[0].len();
        let centre: Vec<f64> = (0..dims)
            .map(|d| descriptors.iter().map(|r| r[d]).sum::<f64>() / descriptors.len() as f64)
            .collect();
        descriptors
            .iter()
            .map(|r| r.iter().zip(&centre).map(|(a, b)| (a - b).powi(2)).sum::<f64>())
            .sum()
    };
    let explained = if total_ss < 1e-12 {
        1.0
    } else {
        1.0 - kmeans.inertia / total_ss
    };

    let reliability = Reliability::default()
        .with_extra("clusters", clusters.len() as f64)
        .with_extra("inertia", kmeans.inertia)
        .with_extra("kmeans_iterations", kmeans.iterations as f64)
        .with_extra("explained_variance", explained);

    let output = LandUsePlan {
        current_mix: mix_map(&current),
        optimal_mix: mix_map(&optimal),
        housing_units_target: housing_units,
        housing_source,
        clusters,
        sustainability,
        development_priorities: development_priorities(&conversions, green_goal),
        conversions,
    };
    Ok(ModelResult::new(
        ModelId::LandUse,
        ModelOutput::LandUse(output),
        reliability,
        explained,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Domain, FeatureValue, TimePoint};

    /// A residential west side, a commercial east side, a little green
    fn parcel_points() -> Vec<SpatialPoint> {
        let mut parcels = Vec::new();
        for row in 0..4 {
            for col in 0..6 {
                let use_ = match (row, col) {
                    (0, 0) => "green",
                    (3, 5) => "industrial",
                    (_, c) if c < 3 => "residential",
                    _ => "commercial",
                };
                parcels.push(
                    SpatialPoint::new(40.70 + row as f64 * 0.002, -74.0 + col as f64 * 0.004, 1_000.0)
                        .with_label(use_)
                        .with_magnitude(250_000.0)
                        .with_id(format!("p-{}-{}", row, col)),
                );
            }
        }
        parcels
    }

    fn parcel_record() -> FeatureRecord {
        FeatureRecord::builder(Domain::Parcel)
            .insert_points(keys::PARCEL_PARCELS, parcel_points())
            .insert_points(
                keys::PARCEL_TRANSIT_STOPS,
                vec![SpatialPoint::new(40.703, -73.99, 1.0)],
            )
            .build()
    }

    fn plan_of(result: &ModelResult) -> &LandUsePlan {
        match &result.output {
            ModelOutput::LandUse(plan) => plan,
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_caps_redistribute_excess() {
        let capped = apply_caps([0.7, 0.1, 0.1, 0.1], [Some(0.4), None, None, None]);
        assert!((capped[0] - 0.4).abs() < 1e-9);
        assert!((capped.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((capped[1] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_unsatisfiable_caps_rescale() {
        let capped = apply_caps([0.25; 4], [Some(0.1); 4]);
        assert!((capped.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_diversity_bounds() {
        assert!((diversity(&[0.25; 4]) - 1.0).abs() < 1e-9);
        assert_eq!(diversity(&[1.0, 0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_plan_structure() {
        let result = fit_and_forecast(&parcel_record(), Horizon::NotApplicable, &LandUseParams::default(), 42).unwrap();
        let plan = plan_of(&result);
        let optimal_total: f64 = plan.optimal_mix.values().sum();
        assert!((optimal_total - 1.0).abs() < 1e-9);
        assert!((plan.optimal_mix[&LandUseKind::Industrial] - 0.1).abs() < 1e-9);
        assert_eq!(plan.housing_source, HousingSource::Default);
        assert_eq!(plan.housing_units_target, 1_000.0);
        assert!(plan.clusters.len() <= 4);
        assert_eq!(plan.clusters.iter().map(|c| c.parcels).sum::<usize>(), 24);
        assert!((0.0..=100.0).contains(&plan.sustainability.score));
        for pair in plan.conversions.windows(2) {
            assert!(pair[0].delta >= pair[1].delta);
        }
        assert!(plan.conversions.iter().all(|c| c.delta > 0.15 && c.from != c.to));
        assert!(plan
            .development_priorities
            .iter()
            .any(|p| p.starts_with("Priority 3")));
    }

    #[test]
    fn test_housing_follows_upstream_population() {
        let record = parcel_record()
            .with_injected(
                ModelId::UrbanGrowth,
                GROWTH_POPULATION_PROJECTION,
                FeatureValue::Series(vec![TimePoint::new(0, 100_000.0), TimePoint::new(1, 105_000.0)]),
            )
            .unwrap();
        let result = fit_and_forecast(&record, Horizon::NotApplicable, &LandUseParams::default(), 42).unwrap();
        let plan = plan_of(&result);
        assert_eq!(plan.housing_source, HousingSource::Upstream);
        assert_eq!(plan.housing_units_target, 2_000.0);
    }

    #[test]
    fn test_zoning_cap_bounds_optimal_mix() {
        let record = FeatureRecord::merge([
            &parcel_record(),
            &FeatureRecord::builder(Domain::Parcel)
                .insert_scalar("parcel.zoning_cap.residential", 0.2)
                .build(),
        ])
        .unwrap();
        let result = fit_and_forecast(&record, Horizon::NotApplicable, &LandUseParams::default(), 42).unwrap();
        let plan = plan_of(&result);
        assert!(plan.optimal_mix[&LandUseKind::Residential] <= 0.2 + 1e-9);
    }
}
