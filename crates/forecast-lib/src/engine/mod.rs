//! Execution engine
//!
//! Runs a forecast request batch by batch:
//! - Resolves the requested models (plus required upstreams) into batches
//! - Adapts each domain payload at most once per request
//! - Runs every model of a batch concurrently on the blocking pool
//! - Injects chained outputs of finished upstreams into dependents
//! - Enforces per-node timeouts and a request deadline
//! - Consults the shared result cache before running a model

mod node;

pub use node::{ExecutionNode, NodeFailure, NodeStatus};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::aggregator::{aggregate, ForecastBundle};
use crate::algorithms::ModelResult;
use crate::cache::{fingerprint, CacheKey, ResultCache};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::{FeatureAdapter, FeatureRecord, RawPayloads};
use crate::models::{Domain, Horizon, ModelId};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::registry::{ModelDescriptor, ModelRegistry};

/// A forecast request: which models, their raw inputs and horizon overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub models: BTreeSet<ModelId>,
    #[serde(default)]
    pub payloads: RawPayloads,
    /// Horizon steps per model, in the model's own unit
    #[serde(default)]
    pub horizons: BTreeMap<ModelId, u32>,
}

impl ForecastRequest {
    pub fn new(models: impl IntoIterator<Item = ModelId>, payloads: RawPayloads) -> Self {
        Self {
            models: models.into_iter().collect(),
            payloads,
            horizons: BTreeMap::new(),
        }
    }

    pub fn with_horizon(mut self, model: ModelId, steps: u32) -> Self {
        self.horizons.insert(model, steps);
        self
    }

    pub fn with_payload(mut self, domain: Domain, payload: serde_json::Value) -> Self {
        self.payloads.insert(domain, payload);
        self
    }
}

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub requests: u64,
    /// Model runs that reached an estimator
    pub executions: u64,
    pub cache_hits: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct PipelineCounters {
    requests: AtomicU64,
    executions: AtomicU64,
    cache_hits: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// What to do with a pending node
enum Prepared {
    Skip(ModelId, NodeStatus),
    Fail(PipelineError),
    Cached {
        input: Arc<FeatureRecord>,
        horizon: Horizon,
        result: Arc<ModelResult>,
    },
    Run {
        input: Arc<FeatureRecord>,
        horizon: Horizon,
        cache_slot: Option<(CacheKey, Duration)>,
        budget: Duration,
    },
}

/// Domain records of one request, adapted on first use
struct DomainInputs<'r> {
    adapter: &'r FeatureAdapter,
    payloads: &'r RawPayloads,
    prepared: BTreeMap<Domain, Result<Arc<FeatureRecord>>>,
}

impl<'r> DomainInputs<'r> {
    fn new(adapter: &'r FeatureAdapter, payloads: &'r RawPayloads) -> Self {
        Self {
            adapter,
            payloads,
            prepared: BTreeMap::new(),
        }
    }

    /// `None` when no payload was supplied for `domain`
    fn get(&mut self, domain: Domain) -> Option<Result<Arc<FeatureRecord>>> {
        let payloads = self.payloads;
        let payload = payloads.get(domain)?;
        let adapter = self.adapter;
        Some(
            self.prepared
                .entry(domain)
                .or_insert_with(|| adapter.prepare(domain, payload).map(Arc::new))
                .clone(),
        )
    }
}

/// The forecasting pipeline. Cheap to share behind an `Arc`; the only
/// cross-request state is the result cache and the counters.
pub struct ForecastPipeline {
    config: Arc<PipelineConfig>,
    registry: Arc<ModelRegistry>,
    adapter: FeatureAdapter,
    cache: Arc<ResultCache>,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
    counters: PipelineCounters,
}

impl ForecastPipeline {
    /// Pipeline over the standard model registry
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_registry(config, ModelRegistry::standard()?)
    }

    pub fn with_registry(config: PipelineConfig, registry: ModelRegistry) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            adapter: FeatureAdapter::new(config.history.clone()),
            config: Arc::new(config),
            registry: Arc::new(registry),
            cache: Arc::new(ResultCache::new()),
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new("urban-forecast"),
            counters: PipelineCounters::default(),
        })
    }

    /// Share a cache between pipelines
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            executions: self.counters.executions.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// Runs every requested model and its required upstreams.
    ///
    /// Model failures are reported inside the bundle. Only an empty request
    /// or an unresolvable plan is an error.
    pub async fn run(&self, request: ForecastRequest) -> Result<ForecastBundle> {
        let started = Instant::now();
        let deadline = started + self.config.request_deadline();
        let request_id = self.counters.requests.fetch_add(1, Ordering::Relaxed) + 1;

        let batches = self.registry.resolve_order(&request.models)?;
        let purged = self.cache.purge_expired();
        if purged > 0 {
            debug!(request_id = request_id, purged = purged, "Purged expired cache entries");
        }
        let mut nodes: BTreeMap<ModelId, ExecutionNode<'_>> = BTreeMap::new();
        for batch in &batches {
            for id in &batch.models {
                nodes.insert(*id, ExecutionNode::new(self.registry.descriptor(*id)?));
            }
        }
        for model in request.horizons.keys().filter(|m| !nodes.contains_key(*m)) {
            debug!(request_id = request_id, model = %model, "Ignoring horizon for unplanned model");
        }
        self.logger
            .log_request_started(request_id, request.models.len(), nodes.len(), batches.len());

        let mut domains = DomainInputs::new(&self.adapter, &request.payloads);

        for batch in &batches {
            let mut running = JoinSet::new();
            let mut cache_slots = BTreeMap::new();

            for &model in &batch.models {
                let descriptor = self.registry.descriptor(model)?;
                let prepared = self.prepare(request_id, descriptor, &request, &nodes, &mut domains, deadline);
                let Some(node) = nodes.get_mut(&model) else {
                    continue;
                };
                match prepared {
                    Prepared::Skip(upstream, upstream_status) => {
                        node.skip(upstream, upstream_status);
                        self.logger.log_node_skipped(request_id, model, upstream);
                    }
                    Prepared::Fail(err) => {
                        self.logger
                            .log_node_failed(request_id, model, err.kind(), &err.to_string());
                        node.fail(&err, Duration::ZERO);
                    }
                    Prepared::Cached {
                        input,
                        horizon,
                        result,
                    } => {
                        node.input = Some(input);
                        node.horizon = Some(horizon);
                        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                        self.logger.log_node_succeeded(request_id, model, 0, result.confidence, true);
                        node.succeed(result, Duration::ZERO, true);
                    }
                    Prepared::Run {
                        input,
                        horizon,
                        cache_slot,
                        budget,
                    } => {
                        node.input = Some(input.clone());
                        node.horizon = Some(horizon);
                        node.start();
                        if let Some(slot) = cache_slot {
                            cache_slots.insert(model, slot);
                        }
                        self.counters.executions.fetch_add(1, Ordering::Relaxed);
                        self.metrics.inc_executions(model);

                        let algorithm = descriptor.algorithm;
                        let config = Arc::clone(&self.config);
                        running.spawn(async move {
                            let began = Instant::now();
                            let handle = tokio::task::spawn_blocking(move || {
                                algorithm.run(&input, horizon, &config.params)
                            });
                            let outcome = match tokio::time::timeout(budget, handle).await {
                                Ok(Ok(outcome)) => outcome,
                                Ok(Err(join_err)) => Err(PipelineError::fit(format!(
                                    "estimator task aborted: {}",
                                    join_err
                                ))),
                                Err(_) => Err(PipelineError::Timeout {
                                    model,
                                    after: budget,
                                }),
                            };
                            (model, outcome, began.elapsed())
                        });
                    }
                }
            }

            while let Some(joined) = running.join_next().await {
                let (model, outcome, elapsed) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        warn!(request_id = request_id, error = %e, "Model task ended abnormally");
                        continue;
                    }
                };
                self.metrics.observe_model_latency(model, elapsed.as_secs_f64());
                let Some(node) = nodes.get_mut(&model) else {
                    continue;
                };
                match outcome {
                    Ok(result) => {
                        let mut shared = Arc::new(result);
                        if let Some((key, ttl)) = cache_slots.remove(&model) {
                            shared = self.cache.put_if_absent(key, shared, ttl);
                        }
                        self.logger.log_node_succeeded(
                            request_id,
                            model,
                            elapsed.as_millis() as u64,
                            shared.confidence,
                            false,
                        );
                        node.succeed(shared, elapsed, false);
                    }
                    Err(err) => {
                        self.logger
                            .log_node_failed(request_id, model, err.kind(), &err.to_string());
                        node.fail(&err, elapsed);
                    }
                }
            }

            for model in &batch.models {
                if let Some(node) = nodes.get_mut(model) {
                    if node.status() == NodeStatus::Running {
                        node.fail(
                            &PipelineError::fit("model task ended without a result"),
                            Duration::ZERO,
                        );
                    }
                }
            }
        }

        let bundle = aggregate(
            &request.models,
            &nodes,
            self.config.low_confidence_threshold,
            chrono::Utc::now().timestamp(),
        );
        self.record_outcomes(&nodes);
        self.metrics.set_completeness(bundle.completeness);

        let count = |status: NodeStatus| nodes.values().filter(|n| n.status() == status).count();
        self.logger.log_request_completed(
            request_id,
            bundle.completeness,
            count(NodeStatus::Succeeded),
            count(NodeStatus::Failed),
            count(NodeStatus::Skipped),
            started.elapsed().as_millis() as u64,
        );
        Ok(bundle)
    }

    /// Decides the fate of a pending node from its upstreams and inputs
    fn prepare(
        &self,
        request_id: u64,
        descriptor: &ModelDescriptor,
        request: &ForecastRequest,
        nodes: &BTreeMap<ModelId, ExecutionNode<'_>>,
        domains: &mut DomainInputs<'_>,
        deadline: Instant,
    ) -> Prepared {
        let model = descriptor.id;

        for upstream in descriptor.required_upstreams() {
            let status = nodes
                .get(&upstream)
                .map(ExecutionNode::status)
                .unwrap_or(NodeStatus::Pending);
            if status != NodeStatus::Succeeded {
                return Prepared::Skip(upstream, status);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Prepared::Fail(PipelineError::Timeout {
                model,
                after: self.config.request_deadline(),
            });
        }

        let horizon = match descriptor.resolve_horizon(request.horizons.get(&model).copied()) {
            Ok(h) => h,
            Err(e) => return Prepared::Fail(e),
        };

        let input = match self.assemble_input(request_id, descriptor, nodes, domains) {
            Ok(input) => Arc::new(input),
            Err(e) => return Prepared::Fail(e),
        };

        let cache_slot = self.cache_slot(descriptor, &input, horizon);
        if let Some((key, _)) = &cache_slot {
            match self.cache.get(key) {
                Some(result) => {
                    self.metrics.inc_cache_hit();
                    return Prepared::Cached {
                        input,
                        horizon,
                        result,
                    };
                }
                None => self.metrics.inc_cache_miss(),
            }
        }

        let budget = self
            .config
            .node_timeout(horizon.steps())
            .min(deadline.saturating_duration_since(now));
        Prepared::Run {
            input,
            horizon,
            cache_slot,
            budget,
        }
    }

    /// Merges domain records and injects outputs of succeeded upstreams
    fn assemble_input(
        &self,
        request_id: u64,
        descriptor: &ModelDescriptor,
        nodes: &BTreeMap<ModelId, ExecutionNode<'_>>,
        domains: &mut DomainInputs<'_>,
    ) -> Result<FeatureRecord> {
        let model = descriptor.id;
        let mut parts = Vec::new();
        for &domain in &descriptor.required_domains {
            match domains.get(domain) {
                None => {
                    return Err(PipelineError::malformed(format!(
                        "{} requires a {} payload",
                        model, domain
                    )))
                }
                Some(record) => parts.push(record?),
            }
        }
        for &domain in &descriptor.optional_domains {
            match domains.get(domain) {
                None => {}
                Some(Ok(record)) => parts.push(record),
                Some(Err(e)) => {
                    self.logger.log_optional_input_ignored(
                        request_id,
                        model,
                        domain.as_str(),
                        &e.to_string(),
                    );
                }
            }
        }

        let mut record = FeatureRecord::merge(parts.iter().map(Arc::as_ref))?;
        for dependency in &descriptor.upstream {
            let Some(upstream) = nodes.get(&dependency.id) else {
                continue;
            };
            match upstream.result() {
                Some(result) if upstream.is_succeeded() => {
                    for (field, value) in result.chained_outputs() {
                        record = record.with_injected(dependency.id, field, value)?;
                    }
                }
                _ => {
                    self.logger.log_optional_input_ignored(
                        request_id,
                        model,
                        dependency.id.as_str(),
                        &format!("upstream is {}", upstream.status()),
                    );
                }
            }
        }
        Ok(record)
    }

    fn cache_slot(
        &self,
        descriptor: &ModelDescriptor,
        input: &FeatureRecord,
        horizon: Horizon,
    ) -> Option<(CacheKey, Duration)> {
        let ttl = self.config.cache_ttl(descriptor)?;
        let keyed = self
            .config
            .params
            .fingerprint_section(descriptor.id)
            .and_then(|params| fingerprint(input, horizon, &params));
        match keyed {
            Ok(fp) => Some((CacheKey::new(descriptor.id, fp), ttl)),
            Err(e) => {
                warn!(model = %descriptor.id, error = %e, "Running uncached, fingerprint failed");
                None
            }
        }
    }

    fn record_outcomes(&self, nodes: &BTreeMap<ModelId, ExecutionNode<'_>>) {
        for node in nodes.values() {
            let counter = match node.status() {
                NodeStatus::Succeeded => &self.counters.succeeded,
                NodeStatus::Failed => &self.counters.failed,
                NodeStatus::Skipped => &self.counters.skipped,
                NodeStatus::Pending | NodeStatus::Running => continue,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            self.metrics.inc_outcome(node.status().as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::EntryStatus;
    use crate::error::ReasonKind;
    use serde_json::json;

    fn aqi_payload(days: usize) -> serde_json::Value {
        let readings: Vec<_> = (0..days)
            .map(|d| {
                json!({
                    "timestamp": 1_700_000_000 + (d as i64) * 86_400,
                    "aqi": 50.0 + (d % 7) as f64 * 4.0,
                })
            })
            .collect();
        json!({ "observations": readings })
    }

    #[tokio::test]
    async fn test_missing_required_payload_fails_node() {
        let pipeline = ForecastPipeline::new(PipelineConfig::default()).unwrap();
        let bundle = pipeline
            .run(ForecastRequest::new([ModelId::Crime], RawPayloads::new()))
            .await
            .unwrap();
        let entry = &bundle.models[&ModelId::Crime];
        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.reason_kind, Some(ReasonKind::MalformedInputError));
        assert_eq!(bundle.completeness, 0.0);
        assert_eq!(pipeline.stats().executions, 0);
    }

    #[tokio::test]
    async fn test_run_sweeps_expired_cache_entries() {
        let cache = Arc::new(ResultCache::new());
        let pipeline = ForecastPipeline::new(PipelineConfig::default())
            .unwrap()
            .with_cache(Arc::clone(&cache));
        cache.put_if_absent(
            CacheKey::new(ModelId::Transit, "stale"),
            crate::cache::sample_result(0.5),
            Duration::ZERO,
        );
        cache.put_if_absent(
            CacheKey::new(ModelId::Transit, "live"),
            crate::cache::sample_result(0.5),
            Duration::from_secs(60),
        );

        pipeline
            .run(ForecastRequest::new([ModelId::Crime], RawPayloads::new()))
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_horizon_out_of_bounds_fails_node() {
        let pipeline = ForecastPipeline::new(PipelineConfig::default()).unwrap();
        let request = ForecastRequest::new([ModelId::Aqi], RawPayloads::new())
            .with_payload(Domain::Aqi, aqi_payload(30))
            .with_horizon(ModelId::Aqi, 30);
        let bundle = pipeline.run(request).await.unwrap();
        let entry = &bundle.models[&ModelId::Aqi];
        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.reason_kind, Some(ReasonKind::MalformedInputError));
    }

    #[tokio::test]
    async fn test_empty_request_is_an_error() {
        let pipeline = ForecastPipeline::new(PipelineConfig::default()).unwrap();
        let err = pipeline.run(ForecastRequest::default()).await.unwrap_err();
        assert_eq!(err, PipelineError::EmptyRequest);
    }

    #[test]
    fn test_node_past_deadline_fails_with_timeout() {
        let pipeline = ForecastPipeline::new(PipelineConfig::default()).unwrap();
        let request = ForecastRequest::new([ModelId::Aqi], RawPayloads::new())
            .with_payload(Domain::Aqi, aqi_payload(30));
        let descriptor = pipeline.registry().descriptor(ModelId::Aqi).unwrap();
        let nodes = BTreeMap::new();
        let mut domains = DomainInputs::new(&pipeline.adapter, &request.payloads);

        let prepared = pipeline.prepare(1, descriptor, &request, &nodes, &mut domains, Instant::now());
        match prepared {
            Prepared::Fail(err) => assert_eq!(err.kind(), ReasonKind::TimeoutError),
            _ => panic!("expected a timeout failure"),
        }
    }

    #[test]
    fn test_required_upstream_failure_skips() {
        let pipeline = ForecastPipeline::new(PipelineConfig::default()).unwrap();
        let request = ForecastRequest::new([ModelId::EnergyDemand], RawPayloads::new());
        let registry = pipeline.registry();
        let mut nodes = BTreeMap::new();
        let mut growth = ExecutionNode::new(registry.descriptor(ModelId::UrbanGrowth).unwrap());
        growth.fail(&PipelineError::fit("singular"), Duration::ZERO);
        nodes.insert(ModelId::UrbanGrowth, growth);
        let mut domains = DomainInputs::new(&pipeline.adapter, &request.payloads);

        let prepared = pipeline.prepare(
            1,
            registry.descriptor(ModelId::EnergyDemand).unwrap(),
            &request,
            &nodes,
            &mut domains,
            Instant::now() + Duration::from_secs(60),
        );
        assert!(matches!(
            prepared,
            Prepared::Skip(ModelId::UrbanGrowth, NodeStatus::Failed)
        ));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: ForecastRequest = serde_json::from_value(json!({
            "models": ["traffic", "aqi"],
            "horizons": { "traffic": 12 }
        }))
        .unwrap();
        assert_eq!(request.models.len(), 2);
        assert!(request.payloads.is_empty());
        assert_eq!(request.horizons[&ModelId::Traffic], 12);
    }
}
