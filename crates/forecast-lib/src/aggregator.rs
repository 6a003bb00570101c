//! Result aggregation
//!
//! Turns the terminal execution nodes of a request into a
//! [`ForecastBundle`]. Requested models land under `models`; upstream
//! models that were only added to satisfy a required chain land under
//! `supporting` and do not count toward completeness.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::algorithms::{ModelOutput, Reliability};
use crate::engine::{ExecutionNode, NodeStatus};
use crate::error::ReasonKind;
use crate::models::ModelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Ok,
    Failed,
    Skipped,
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryStatus::Ok => "ok",
            EntryStatus::Failed => "failed",
            EntryStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Per-model entry of a bundle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelEntry {
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ModelOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reliability: Option<Reliability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub low_confidence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_kind: Option<ReasonKind>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
    pub duration_ms: u64,
}

impl ModelEntry {
    fn from_node(node: &ExecutionNode<'_>, low_confidence_threshold: f64) -> Self {
        let duration_ms = node.duration().as_millis() as u64;
        match (node.status(), node.result()) {
            (NodeStatus::Succeeded, Some(result)) => {
                let low_confidence = result.confidence < low_confidence_threshold;
                let confidence_note = low_confidence.then(|| {
                    format!(
                        "confidence {:.2} is below the {:.2} threshold; treat this forecast as indicative",
                        result.confidence, low_confidence_threshold
                    )
                });
                Self {
                    status: EntryStatus::Ok,
                    result: Some(result.output.clone()),
                    reliability: Some(result.reliability.clone()),
                    confidence: Some(result.confidence),
                    low_confidence,
                    confidence_note,
                    reason: None,
                    reason_kind: None,
                    cached: node.is_cached(),
                    duration_ms,
                }
            }
            (status, _) => {
                let failure = node.failure();
                Self {
                    status: if status == NodeStatus::Skipped {
                        EntryStatus::Skipped
                    } else {
                        EntryStatus::Failed
                    },
                    result: None,
                    reliability: None,
                    confidence: None,
                    low_confidence: false,
                    confidence_note: None,
                    reason: Some(
                        failure
                            .map(|f| f.reason.clone())
                            .unwrap_or_else(|| format!("model ended in state {}", status)),
                    ),
                    reason_kind: Some(
                        failure
                            .map(|f| f.kind)
                            .unwrap_or(ReasonKind::ModelFitError),
                    ),
                    cached: false,
                    duration_ms,
                }
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == EntryStatus::Ok
    }

    fn without_timing(&self) -> Self {
        Self {
            duration_ms: 0,
            cached: false,
            ..self.clone()
        }
    }
}

/// Aggregated outcome of one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastBundle {
    pub models: BTreeMap<ModelId, ModelEntry>,
    pub supporting: BTreeMap<ModelId, ModelEntry>,
    /// Succeeded requested models over requested models
    pub completeness: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_confidence: Option<f64>,
    /// Unix seconds
    pub generated_at: i64,
}

impl ForecastBundle {
    /// Equality ignoring timing fields (`duration_ms`, `generated_at`) and cache provenance
    pub fn same_content(&self, other: &ForecastBundle) -> bool {
        fn strip(entries: &BTreeMap<ModelId, ModelEntry>) -> BTreeMap<ModelId, ModelEntry> {
            entries
                .iter()
                .map(|(id, entry)| (*id, entry.without_timing()))
                .collect()
        }
        strip(&self.models) == strip(&other.models)
            && strip(&self.supporting) == strip(&other.supporting)
            && self.completeness == other.completeness
            && self.overall_confidence == other.overall_confidence
    }

    pub fn entry(&self, model: ModelId) -> Option<&ModelEntry> {
        self.models.get(&model).or_else(|| self.supporting.get(&model))
    }

    pub fn count(&self, status: EntryStatus) -> usize {
        self.models.values().filter(|e| e.status == status).count()
    }
}

/// Builds the bundle from terminal nodes
pub fn aggregate(
    requested: &BTreeSet<ModelId>,
    nodes: &BTreeMap<ModelId, ExecutionNode<'_>>,
    low_confidence_threshold: f64,
    generated_at: i64,
) -> ForecastBundle {
    let mut models = BTreeMap::new();
    let mut supporting = BTreeMap::new();
    for (id, node) in nodes {
        let entry = ModelEntry::from_node(node, low_confidence_threshold);
        if requested.contains(id) {
            models.insert(*id, entry);
        } else {
            supporting.insert(*id, entry);
        }
    }

    let confidences: Vec<f64> = models.values().filter_map(|e| e.confidence).collect();
    let completeness = if requested.is_empty() {
        0.0
    } else {
        confidences.len() as f64 / requested.len() as f64
    };
    let overall_confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };

    ForecastBundle {
        models,
        supporting,
        completeness,
        overall_confidence,
        generated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::output::ModelResult;
    use crate::algorithms::transit::{CoverageGap, TransitPlan};
    use crate::error::PipelineError;
    use crate::registry::ModelRegistry;
    use std::sync::Arc;
    use std::time::Duration;

    fn transit_result(confidence: f64) -> Arc<ModelResult> {
        Arc::new(ModelResult::new(
            ModelId::Transit,
            ModelOutput::Transit(TransitPlan {
                stops: vec![],
                coverage_gap: CoverageGap {
                    unclustered_points: 0,
                    unserved_demand: 0.0,
                    unserved_share: 0.0,
                },
                route_efficiency: 100.0,
                served_population: None,
                growth_factor: 1.0,
                eps_km: 0.5,
                min_samples: 3,
                recommendations: vec![],
            }),
            Reliability::default(),
            confidence,
        ))
    }

    #[test]
    fn test_aggregate_completeness_and_supporting() {
        let registry = ModelRegistry::standard().unwrap();
        let mut nodes = BTreeMap::new();

        let mut transit = ExecutionNode::new(registry.descriptor(ModelId::Transit).unwrap());
        transit.start();
        transit.succeed(transit_result(0.3), Duration::from_millis(12), false);
        nodes.insert(ModelId::Transit, transit);

        let mut growth = ExecutionNode::new(registry.descriptor(ModelId::UrbanGrowth).unwrap());
        growth.fail(&PipelineError::insufficient("demographic records", 5, 2), Duration::ZERO);
        nodes.insert(ModelId::UrbanGrowth, growth);

        let mut energy = ExecutionNode::new(registry.descriptor(ModelId::EnergyDemand).unwrap());
        energy.skip(ModelId::UrbanGrowth, NodeStatus::Failed);
        nodes.insert(ModelId::EnergyDemand, energy);

        let requested: BTreeSet<ModelId> = [ModelId::Transit, ModelId::EnergyDemand].into();
        let bundle = aggregate(&requested, &nodes, 0.5, 0);

        assert_eq!(bundle.completeness, 0.5);
        assert_eq!(bundle.overall_confidence, Some(0.3));
        assert!(bundle.supporting.contains_key(&ModelId::UrbanGrowth));
        assert!(!bundle.models.contains_key(&ModelId::UrbanGrowth));

        let transit = &bundle.models[&ModelId::Transit];
        assert!(transit.low_confidence);
        assert!(transit.confidence_note.is_some());

        let energy = &bundle.models[&ModelId::EnergyDemand];
        assert_eq!(energy.status, EntryStatus::Skipped);
        assert_eq!(energy.reason_kind, Some(ReasonKind::UpstreamUnavailable));
        assert_eq!(bundle.count(EntryStatus::Skipped), 1);
    }

    #[test]
    fn test_bundle_serialization_shape() {
        let registry = ModelRegistry::standard().unwrap();
        let mut nodes = BTreeMap::new();
        let mut aqi = ExecutionNode::new(registry.descriptor(ModelId::Aqi).unwrap());
        aqi.fail(&PipelineError::insufficient("aqi observations", 14, 5), Duration::ZERO);
        nodes.insert(ModelId::Aqi, aqi);

        let requested: BTreeSet<ModelId> = [ModelId::Aqi].into();
        let bundle = aggregate(&requested, &nodes, 0.5, 1_700_000_000);
        let json = serde_json::to_value(&bundle).unwrap();

        assert_eq!(json["models"]["aqi"]["status"], "failed");
        assert_eq!(json["models"]["aqi"]["reason_kind"], "InsufficientHistoryError");
        assert_eq!(json["completeness"], 0.0);
        assert!(json.get("overall_confidence").is_none());
        assert!(json["models"]["aqi"].get("result").is_none());
        assert_eq!(json["generated_at"], 1_700_000_000);
    }

    #[test]
    fn test_same_content_ignores_timing() {
        let registry = ModelRegistry::standard().unwrap();
        let build = |ms: u64, cached: bool, at: i64| {
            let mut nodes = BTreeMap::new();
            let mut transit = ExecutionNode::new(registry.descriptor(ModelId::Transit).unwrap());
            transit.start();
            transit.succeed(transit_result(0.8), Duration::from_millis(ms), cached);
            nodes.insert(ModelId::Transit, transit);
            aggregate(&[ModelId::Transit].into(), &nodes, 0.5, at)
        };
        let a = build(40, false, 1);
        let b = build(0, true, 2);
        assert_ne!(a, b);
        assert!(a.same_content(&b));
    }
}
