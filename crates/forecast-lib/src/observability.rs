//! Observability infrastructure for the forecasting pipeline
//!
//! Provides:
//! - Prometheus metrics (model latency, executions, cache hits, node outcomes, completeness)
//! - Structured JSON logging with tracing

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::error::ReasonKind;
use crate::models::ModelId;

/// Histogram buckets for model latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once). `None` when registration failed.
static GLOBAL_METRICS: OnceLock<Option<PipelineMetricsInner>> = OnceLock::new();

struct PipelineMetricsInner {
    registry: Registry,
    model_latency_seconds: HistogramVec,
    model_executions: IntCounterVec,
    node_outcomes: IntCounterVec,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    last_completeness: Gauge,
}

impl PipelineMetricsInner {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("urban_forecast".to_string()), None)?;

        let model_latency_seconds = HistogramVec::new(
            HistogramOpts::new("model_latency_seconds", "Wall-clock time of one model run")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["model"],
        )?;
        let model_executions = IntCounterVec::new(
            Opts::new("model_executions_total", "Model runs that reached the estimator"),
            &["model"],
        )?;
        let node_outcomes = IntCounterVec::new(
            Opts::new("node_outcomes_total", "Final node states by status"),
            &["status"],
        )?;
        let cache_hits = IntCounter::new("cache_hits_total", "Results served from the cache")?;
        let cache_misses = IntCounter::new("cache_misses_total", "Cache lookups without a live entry")?;
        let last_completeness = Gauge::new(
            "last_completeness_ratio",
            "Completeness of the most recent forecast bundle",
        )?;

        registry.register(Box::new(model_latency_seconds.clone()))?;
        registry.register(Box::new(model_executions.clone()))?;
        registry.register(Box::new(node_outcomes.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(last_completeness.clone()))?;

        Ok(Self {
            registry,
            model_latency_seconds,
            model_executions,
            node_outcomes,
            cache_hits,
            cache_misses,
            last_completeness,
        })
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match PipelineMetricsInner::new() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(event = "metrics_disabled", error = %e, "Failed to register pipeline metrics");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&PipelineMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    pub fn observe_model_latency(&self, model: ModelId, duration_secs: f64) {
        if let Some(m) = self.inner() {
            m.model_latency_seconds
                .with_label_values(&[model.as_str()])
                .observe(duration_secs);
        }
    }

    pub fn inc_executions(&self, model: ModelId) {
        if let Some(m) = self.inner() {
            m.model_executions.with_label_values(&[model.as_str()]).inc();
        }
    }

    /// Count a final node status (`succeeded`, `failed`, `skipped`)
    pub fn inc_outcome(&self, status: &str) {
        if let Some(m) = self.inner() {
            m.node_outcomes.with_label_values(&[status]).inc();
        }
    }

    pub fn inc_cache_hit(&self) {
        if let Some(m) = self.inner() {
            m.cache_hits.inc();
        }
    }

    pub fn inc_cache_miss(&self) {
        if let Some(m) = self.inner() {
            m.cache_misses.inc();
        }
    }

    pub fn set_completeness(&self, ratio: f64) {
        if let Some(m) = self.inner() {
            m.last_completeness.set(ratio);
        }
    }

    /// Prometheus text exposition of every pipeline metric
    pub fn render(&self) -> String {
        let Some(m) = self.inner() else {
            return String::new();
        };
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&m.registry.gather(), &mut buffer) {
            warn!(event = "metrics_encode_failed", error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for pipeline events
///
/// Keeps field names consistent across the engine so JSON logs can be
/// filtered by `event`.
#[derive(Clone)]
pub struct StructuredLogger {
    pipeline: String,
}

impl StructuredLogger {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
        }
    }

    pub fn log_request_started(&self, request_id: u64, requested: usize, planned: usize, batches: usize) {
        info!(
            event = "request_started",
            pipeline = %self.pipeline,
            request_id = request_id,
            requested = requested,
            planned = planned,
            batches = batches,
            "Forecast request started"
        );
    }

    pub fn log_node_succeeded(&self, request_id: u64, model: ModelId, duration_ms: u64, confidence: f64, cached: bool) {
        info!(
            event = "model_succeeded",
            pipeline = %self.pipeline,
            request_id = request_id,
            model = %model,
            duration_ms = duration_ms,
            confidence = confidence,
            cached = cached,
            "Model produced a result"
        );
    }

    pub fn log_node_failed(&self, request_id: u64, model: ModelId, kind: ReasonKind, reason: &str) {
        warn!(
            event = "model_failed",
            pipeline = %self.pipeline,
            request_id = request_id,
            model = %model,
            reason_kind = %kind,
            reason = %reason,
            "Model failed"
        );
    }

    pub fn log_node_skipped(&self, request_id: u64, model: ModelId, upstream: ModelId) {
        warn!(
            event = "model_skipped",
            pipeline = %self.pipeline,
            request_id = request_id,
            model = %model,
            upstream = %upstream,
            "Model skipped, required upstream unavailable"
        );
    }

    pub fn log_optional_input_ignored(&self, request_id: u64, model: ModelId, source: &str, reason: &str) {
        info!(
            event = "optional_input_ignored",
            pipeline = %self.pipeline,
            request_id = request_id,
            model = %model,
            source = %source,
            reason = %reason,
            "Optional input unavailable, continuing without it"
        );
    }

    pub fn log_request_completed(
        &self,
        request_id: u64,
        completeness: f64,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        duration_ms: u64,
    ) {
        info!(
            event = "request_completed",
            pipeline = %self.pipeline,
            request_id = request_id,
            completeness = completeness,
            succeeded = succeeded,
            failed = failed,
            skipped = skipped,
            duration_ms = duration_ms,
            "Forecast request completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_metrics_render() {
        let metrics = PipelineMetrics::new();
        metrics.observe_model_latency(ModelId::Traffic, 0.02);
        metrics.inc_executions(ModelId::Traffic);
        metrics.inc_outcome("succeeded");
        metrics.inc_cache_hit();
        metrics.inc_cache_miss();
        metrics.set_completeness(0.5);

        let text = metrics.render();
        assert!(text.contains("urban_forecast_model_executions_total"));
        assert!(text.contains("urban_forecast_last_completeness_ratio"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-pipeline");
        assert_eq!(logger.pipeline, "test-pipeline");
    }
}
