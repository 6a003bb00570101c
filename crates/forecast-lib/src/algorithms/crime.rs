//! Crime hotspot detection with an isolation forest
//!
//! Incidents are binned into space-time cells. Each cell is described by its
//! incident count, total severity and number of distinct categories, and
//! cells that isolate quickly are reported as hotspots.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::output::{ModelOutput, ModelResult, Reliability};
use crate::error::{PipelineError, Result};
use crate::estimators::isolation::IsolationForest;
use crate::estimators::stats::{mean, median};
use crate::features::{keys, FeatureRecord};
use crate::models::{Horizon, ModelId, SpatialPoint};

const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrimeParams {
    pub n_trees: usize,
    pub max_samples: usize,
    pub cell_size_deg: f64,
    pub time_bin_hours: u32,
    /// Share of cells reported as anomalous
    pub contamination: f64,
    pub high_risk_score: f64,
    pub medium_risk_score: f64,
    pub top_hotspots: usize,
    /// Mean severity above which a hotspot counts as violent
    pub violent_severity: f64,
}

impl Default for CrimeParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            cell_size_deg: 0.005,
            time_bin_hours: 168,
            contamination: 0.1,
            high_risk_score: 0.65,
            medium_risk_score: 0.55,
            top_hotspots: 20,
            violent_severity: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl CrimeParams {
    pub fn risk_level(&self, score: f64) -> RiskLevel {
        if score >= self.high_risk_score {
            RiskLevel::High
        } else if score >= self.medium_risk_score {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hotspot {
    pub lat: f64,
    pub lon: f64,
    pub window_start: i64,
    pub incident_count: usize,
    pub total_severity: f64,
    pub categories: Vec<String>,
    pub anomaly_score: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrimeStatistics {
    pub total_incidents: usize,
    pub cells: usize,
    pub anomalous_cells: usize,
    pub mean_anomaly_score: f64,
    pub incidents_by_category: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrimeAnalysis {
    pub hotspots: Vec<Hotspot>,
    pub statistics: CrimeStatistics,
    pub prevention_strategies: Vec<String>,
}

/// `(lat cell, lon cell, time bin)`
type CellKey = (i64, i64, i64);

#[derive(Debug, Default)]
struct Cell {
    count: usize,
    severity: f64,
    categories: BTreeSet<String>,
    lat_sum: f64,
    lon_sum: f64,
}

impl Cell {
    fn features(&self) -> Vec<f64> {
        vec![
            self.count as f64,
            self.severity,
            self.categories.len() as f64,
        ]
    }
}

fn bin_incidents(incidents: &[SpatialPoint], params: &CrimeParams) -> Result<BTreeMap<CellKey, Cell>> {
    if params.cell_size_deg.is_nan() || params.cell_size_deg <= 0.0 || params.time_bin_hours == 0 {
        return Err(PipelineError::malformed(
            "crime cell size and time bin must be positive",
        ));
    }
    let bin_secs = i64::from(params.time_bin_hours) * 3600;
    let mut cells: BTreeMap<CellKey, Cell> = BTreeMap::new();
    for incident in incidents {
        let key = (
            (incident.lat / params.cell_size_deg).floor() as i64,
            (incident.lon / params.cell_size_deg).floor() as i64,
            incident.timestamp.unwrap_or(0).div_euclid(bin_secs),
        );
        let cell = cells.entry(key).or_default();
        cell.count += 1;
        // saturate so extreme severities keep the features finite
        cell.severity = (cell.severity + incident.weight).min(f64::MAX);
        cell.categories
            .insert(incident.label.clone().unwrap_or_else(|| UNCATEGORIZED.to_string()));
        cell.lat_sum += incident.lat;
        cell.lon_sum += incident.lon;
    }
    Ok(cells)
}

fn prevention_strategies(hotspots: &[Hotspot], params: &CrimeParams) -> Vec<String> {
    let mut out = Vec::new();
    let high_risk = hotspots
        .iter()
        .filter(|h| h.risk_level == RiskLevel::High)
        .count();
    if high_risk > 0 {
        out.push(format!(
            "Deploy additional patrols to {} high-risk areas",
            high_risk
        ));
    }
    if hotspots
        .iter()
        .any(|h| h.total_severity / h.incident_count.max(1) as f64 > params.violent_severity)
    {
        out.push("Install CCTV cameras and improve lighting in violent crime hotspots".to_string());
    }
    out.push("Implement community policing programs in identified hotspot areas".to_string());
    out.push("Coordinate with social services for intervention programs".to_string());
    out
}

pub fn fit_and_forecast(
    record: &FeatureRecord,
    _horizon: Horizon,
    params: &CrimeParams,
    seed: u64,
) -> Result<ModelResult> {
    let incidents = record.require_points(keys::INCIDENT_POINTS)?;
    let cells = bin_incidents(incidents, params)?;
    if cells.len() < 2 {
        return Err(PipelineError::fit(format!(
            "isolation forest needs at least two occupied cells, got {}",
            cells.len()
        )));
    }

    let keys_and_cells: Vec<(&CellKey, &Cell)> = cells.iter().collect();
    let data: Vec<Vec<f64>> = keys_and_cells.iter().map(|(_, c)| c.features()).collect();
    let forest = IsolationForest::fit(&data, params.n_trees, params.max_samples, seed)?;
    let scores: Vec<f64> = data.iter().map(|row| forest.score(row)).collect();

    let counts: Vec<f64> = keys_and_cells.iter().map(|(_, c)| c.count as f64).collect();
    let count_median = median(&counts);
    let mut eligible: Vec<usize> = (0..cells.len())
        .filter(|&i| counts[i] >= count_median)
        .collect();
    eligible.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    let wanted = ((cells.len() as f64 * params.contamination).round() as usize).max(1);
    let anomalous: Vec<usize> = eligible.into_iter().take(wanted).collect();

    let bin_secs = i64::from(params.time_bin_hours) * 3600;
    let hotspots: Vec<Hotspot> = anomalous
        .iter()
        .take(params.top_hotspots)
        .map(|&i| {
            let (key, cell) = keys_and_cells[i];
            Hotspot {
                lat: cell.lat_sum / cell.count as f64,
                lon: cell.lon_sum / cell.count as f64,
                window_start: key.2 * bin_secs,
                incident_count: cell.count,
                total_severity: cell.severity,
                categories: cell.categories.iter().cloned().collect(),
                anomaly_score: scores[i],
                risk_level: params.risk_level(scores[i]),
            }
        })
        .collect();

    let mut incidents_by_category: BTreeMap<String, usize> = BTreeMap::new();
    for incident in incidents {
        let category = incident.label.as_deref().unwrap_or(UNCATEGORIZED);
        *incidents_by_category.entry(category.to_string()).or_default() += 1;
    }

    let anomalous_set: BTreeSet<usize> = anomalous.iter().copied().collect();
    let (anomalous_scores, rest_scores): (Vec<f64>, Vec<f64>) = {
        let mut a = Vec::new();
        let mut r = Vec::new();
        for (i, s) in scores.iter().enumerate() {
            if anomalous_set.contains(&i) {
                a.push(*s);
            } else {
                r.push(*s);
            }
        }
        (a, r)
    };
    let mean_anomalous = mean(&anomalous_scores);
    let confidence = if rest_scores.is_empty() {
        mean_anomalous
    } else {
        let mean_rest = mean(&rest_scores);
        if mean_rest < 1.0 {
            (mean_anomalous - mean_rest) / (1.0 - mean_rest)
        } else {
            0.0
        }
    };

    let statistics = CrimeStatistics {
        total_incidents: incidents.len(),
        cells: cells.len(),
        anomalous_cells: anomalous.len(),
        mean_anomaly_score: mean(&scores),
        incidents_by_category,
    };
    let reliability = Reliability::default()
        .with_extra("sample_size", forest.sample_size() as f64)
        .with_extra("count_median", count_median)
        .with_extra("mean_anomalous_score", mean_anomalous);

    let output = CrimeAnalysis {
        prevention_strategies: prevention_strategies(&hotspots, params),
        hotspots,
        statistics,
    };
    Ok(ModelResult::new(
        ModelId::Crime,
        ModelOutput::Crime(output),
        reliability,
        confidence,
    ))
}
