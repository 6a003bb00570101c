//! Model registry
//!
//! Static catalog of the forecasting models: which algorithm backs each
//! one, which domains it reads, which models it depends on and how long its
//! results may be cached. Dependencies form a DAG that is resolved into
//! batches of mutually independent models.

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::algorithms::output::{
    GROWTH_FACTOR, GROWTH_POPULATION_PROJECTION, GROWTH_ANNUAL_RATE, TRAFFIC_MEAN_FLOW_RATIO,
    TRAFFIC_PREDICTED_FLOW,
};
use crate::algorithms::Algorithm;
use crate::error::{PipelineError, Result};
use crate::models::{Domain, FieldKind, Horizon, ModelId};

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

/// Edge to a model whose output this model consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamDependency {
    pub id: ModelId,
    /// A required upstream that does not succeed skips the dependent
    pub required: bool,
}

/// One top-level result field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputField {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Published to dependents under `upstream.<model>.<name>`
    pub chained: bool,
}

impl OutputField {
    const fn plain(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            chained: false,
        }
    }

    const fn chained(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            chained: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub id: ModelId,
    pub display_name: &'static str,
    pub algorithm: Algorithm,
    pub required_domains: Vec<Domain>,
    pub optional_domains: Vec<Domain>,
    pub upstream: Vec<UpstreamDependency>,
    pub outputs: Vec<OutputField>,
    pub default_horizon: Horizon,
    /// Inclusive step bounds; `None` for models without a horizon
    pub horizon_bounds: Option<(u32, u32)>,
    /// `None` disables caching for the model
    pub cache_ttl: Option<Duration>,
}

impl ModelDescriptor {
    /// Default horizon, or the override when it lies within bounds
    pub fn resolve_horizon(&self, steps: Option<u32>) -> Result<Horizon> {
        let Some(steps) = steps else {
            return Ok(self.default_horizon);
        };
        match self.horizon_bounds {
            None => Err(PipelineError::malformed(format!(
                "{} does not take a horizon",
                self.id
            ))),
            Some((min, max)) if steps < min || steps > max => Err(PipelineError::malformed(format!(
                "{} horizon {} outside {}..={} {}",
                self.id,
                steps,
                min,
                max,
                self.default_horizon.unit()
            ))),
            Some(_) => Ok(self.default_horizon.with_steps(steps)),
        }
    }

    pub fn required_upstreams(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.upstream.iter().filter(|u| u.required).map(|u| u.id)
    }

    pub fn chained_fields(&self) -> impl Iterator<Item = &OutputField> + '_ {
        self.outputs.iter().filter(|f| f.chained)
    }

    pub fn domains(&self) -> impl Iterator<Item = Domain> + '_ {
        self.required_domains
            .iter()
            .chain(self.optional_domains.iter())
            .copied()
    }
}

/// Models that may run concurrently
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Ordered by id
    pub models: Vec<ModelId>,
}

impl Batch {
    pub fn contains(&self, id: ModelId) -> bool {
        self.models.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// The seven standard model descriptors
pub fn standard_descriptors() -> Vec<ModelDescriptor> {
    use FieldKind::*;
    vec![
        ModelDescriptor {
            id: ModelId::Traffic,
            display_name: "Traffic flow",
            algorithm: Algorithm::RandomForest,
            required_domains: vec![Domain::Traffic],
            optional_domains: vec![Domain::Weather],
            upstream: vec![],
            outputs: vec![
                OutputField::plain("predictions", List),
                OutputField::plain("feature_importance", Map),
                OutputField::plain("congestion_breakpoints", Map),
                OutputField::chained(TRAFFIC_MEAN_FLOW_RATIO, Scalar),
                OutputField::chained(TRAFFIC_PREDICTED_FLOW, Series),
            ],
            default_horizon: Horizon::Hours(24),
            horizon_bounds: Some((1, 24)),
            cache_ttl: Some(HOUR),
        },
        ModelDescriptor {
            id: ModelId::Aqi,
            display_name: "Air quality",
            algorithm: Algorithm::Arima,
            required_domains: vec![Domain::Aqi],
            optional_domains: vec![Domain::Weather, Domain::Traffic],
            upstream: vec![UpstreamDependency {
                id: ModelId::Traffic,
                required: false,
            }],
            outputs: vec![
                OutputField::plain("predictions", List),
                OutputField::plain("model_order", Text),
                OutputField::plain("current_aqi", Scalar),
                OutputField::plain("latest_pollutants", Map),
            ],
            default_horizon: Horizon::Days(7),
            horizon_bounds: Some((1, 7)),
            cache_ttl: Some(DAY),
        },
        ModelDescriptor {
            id: ModelId::UrbanGrowth,
            display_name: "Urban growth",
            algorithm: Algorithm::Ridge,
            required_domains: vec![Domain::Demographic],
            optional_domains: vec![],
            upstream: vec![],
            outputs: vec![
                OutputField::plain("projections", List),
                OutputField::plain("coefficients", Map),
                OutputField::chained(GROWTH_POPULATION_PROJECTION, Series),
                OutputField::chained(GROWTH_ANNUAL_RATE, Scalar),
                OutputField::chained(GROWTH_FACTOR, Scalar),
            ],
            default_horizon: Horizon::Years(5),
            horizon_bounds: Some((1, 10)),
            cache_ttl: Some(DAY),
        },
        ModelDescriptor {
            id: ModelId::Transit,
            display_name: "Transit planning",
            algorithm: Algorithm::Dbscan,
            required_domains: vec![Domain::Mobility],
            optional_domains: vec![Domain::Demographic],
            upstream: vec![UpstreamDependency {
                id: ModelId::UrbanGrowth,
                required: false,
            }],
            outputs: vec![
                OutputField::plain("stops", List),
                OutputField::plain("coverage_gap", Map),
                OutputField::plain("route_efficiency", Scalar),
                OutputField::plain("recommendations", List),
            ],
            default_horizon: Horizon::NotApplicable,
            horizon_bounds: None,
            cache_ttl: None,
        },
        ModelDescriptor {
            id: ModelId::Crime,
            display_name: "Crime hotspots",
            algorithm: Algorithm::IsolationForest,
            required_domains: vec![Domain::Incident],
            optional_domains: vec![],
            upstream: vec![],
            outputs: vec![
                OutputField::plain("hotspots", List),
                OutputField::plain("statistics", Map),
                OutputField::plain("prevention_strategies", List),
            ],
            default_horizon: Horizon::NotApplicable,
            horizon_bounds: None,
            cache_ttl: None,
        },
        ModelDescriptor {
            id: ModelId::EnergyDemand,
            display_name: "Energy demand",
            algorithm: Algorithm::SeasonalDecomposition,
            required_domains: vec![Domain::Energy],
            optional_domains: vec![Domain::Weather],
            upstream: vec![UpstreamDependency {
                id: ModelId::UrbanGrowth,
                required: true,
            }],
            outputs: vec![
                OutputField::plain("daily", List),
                OutputField::plain("hourly", Series),
                OutputField::plain("patterns", Map),
                OutputField::plain("recommendations", List),
            ],
            default_horizon: Horizon::Days(7),
            horizon_bounds: Some((1, 30)),
            cache_ttl: Some(DAY),
        },
        ModelDescriptor {
            id: ModelId::LandUse,
            display_name: "Land use",
            algorithm: Algorithm::ClusteringScoring,
            required_domains: vec![Domain::Parcel],
            optional_domains: vec![],
            upstream: vec![UpstreamDependency {
                id: ModelId::UrbanGrowth,
                required: true,
            }],
            outputs: vec![
                OutputField::plain("optimal_mix", Map),
                OutputField::plain("clusters", List),
                OutputField::plain("sustainability", Map),
                OutputField::plain("conversions", List),
                OutputField::plain("development_priorities", List),
            ],
            default_horizon: Horizon::NotApplicable,
            horizon_bounds: None,
            cache_ttl: None,
        },
    ]
}

/// Dependency graph over a set of models. Edges run from upstream to dependent.
type DependencyGraph = StableDiGraph<ModelId, UpstreamDependency>;

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    descriptors: BTreeMap<ModelId, ModelDescriptor>,
}

impl ModelRegistry {
    /// Registry of the standard models
    pub fn standard() -> Result<Self> {
        Self::from_descriptors(standard_descriptors())
    }

    /// Validates a descriptor table: duplicate ids, undeclared upstreams and cycles
    pub fn from_descriptors(descriptors: Vec<ModelDescriptor>) -> Result<Self> {
        let mut table = BTreeMap::new();
        for descriptor in descriptors {
            let id = descriptor.id;
            if table.insert(id, descriptor).is_some() {
                return Err(PipelineError::malformed(format!(
                    "model {} declared more than once",
                    id
                )));
            }
        }
        for descriptor in table.values() {
            if let Some(missing) = descriptor
                .upstream
                .iter()
                .find(|u| !table.contains_key(&u.id))
            {
                return Err(PipelineError::UnknownModel(format!(
                    "{} (upstream of {})",
                    missing.id, descriptor.id
                )));
            }
        }
        let registry = Self { descriptors: table };
        let everything: BTreeSet<ModelId> = registry.descriptors.keys().copied().collect();
        registry.dependency_graph(&everything)?;
        Ok(registry)
    }

    pub fn get(&self, id: ModelId) -> Option<&ModelDescriptor> {
        self.descriptors.get(&id)
    }

    pub fn descriptor(&self, id: ModelId) -> Result<&ModelDescriptor> {
        self.get(id)
            .ok_or_else(|| PipelineError::UnknownModel(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Requested models plus the transitive closure of their required upstreams
    pub fn plan_members(&self, requested: &BTreeSet<ModelId>) -> Result<BTreeSet<ModelId>> {
        if requested.is_empty() {
            return Err(PipelineError::EmptyRequest);
        }
        let mut members = BTreeSet::new();
        let mut stack: Vec<ModelId> = requested.iter().copied().collect();
        while let Some(id) = stack.pop() {
            if !members.insert(id) {
                continue;
            }
            stack.extend(self.descriptor(id)?.required_upstreams());
        }
        Ok(members)
    }

    /// Execution batches for `requested`. Optional upstreams only order
    /// models that are both in the plan.
    pub fn resolve_order(&self, requested: &BTreeSet<ModelId>) -> Result<Vec<Batch>> {
        let members = self.plan_members(requested)?;
        let graph = self.dependency_graph(&members)?;

        let mut completed = BTreeSet::new();
        let mut batches = Vec::new();
        while completed.len() < graph.node_count() {
            let ready = ready_models(&graph, &completed);
            if ready.is_empty() {
                let stalled = graph
                    .node_indices()
                    .filter_map(|idx| graph.node_weight(idx).copied())
                    .filter(|id| !completed.contains(id))
                    .collect();
                return Err(PipelineError::CyclicDependency(stalled));
            }
            completed.extend(ready.iter().copied());
            batches.push(Batch { models: ready });
        }
        Ok(batches)
    }

    /// Acyclic graph of `members` over every upstream edge inside the set
    fn dependency_graph(&self, members: &BTreeSet<ModelId>) -> Result<DependencyGraph> {
        let mut graph = DependencyGraph::default();
        let mut index: BTreeMap<ModelId, NodeIndex> = BTreeMap::new();
        for &id in members {
            index.insert(id, graph.add_node(id));
        }
        for &id in members {
            for dependency in &self.descriptor(id)?.upstream {
                if let (Some(&from), Some(&to)) = (index.get(&dependency.id), index.get(&id)) {
                    graph.add_edge(from, to, *dependency);
                }
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(PipelineError::CyclicDependency(cycle_members(&graph)));
        }
        Ok(graph)
    }
}

/// Models not yet completed whose upstreams all are, ordered by id
fn ready_models(graph: &DependencyGraph, completed: &BTreeSet<ModelId>) -> Vec<ModelId> {
    let mut ready: Vec<ModelId> = graph
        .node_indices()
        .filter_map(|idx| {
            let id = *graph.node_weight(idx)?;
            if completed.contains(&id) {
                return None;
            }
            let deps_met = graph
                .neighbors_directed(idx, Direction::Incoming)
                .all(|pred| graph.node_weight(pred).map_or(false, |up| completed.contains(up)));
            deps_met.then_some(id)
        })
        .collect();
    ready.sort();
    ready
}

/// Models on some cycle: members of non-trivial strongly connected components
/// and self-dependent models
fn cycle_members(graph: &DependencyGraph) -> Vec<ModelId> {
    let mut members: Vec<ModelId> = petgraph::algo::tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || scc.iter().any(|&idx| graph.find_edge(idx, idx).is_some()))
        .flatten()
        .filter_map(|idx| graph.node_weight(idx).copied())
        .collect();
    members.sort();
    members
}
