//! Pipeline configuration
//!
//! Every field has a default so partial files and environment overrides
//! deserialize cleanly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::algorithms::ModelParams;
use crate::error::{PipelineError, Result};
use crate::features::HistoryRequirements;
use crate::models::ModelId;
use crate::registry::ModelDescriptor;

pub const DEFAULT_NODE_TIMEOUT_BASE_MS: u64 = 5_000;
pub const DEFAULT_NODE_TIMEOUT_PER_STEP_MS: u64 = 250;
pub const DEFAULT_NODE_TIMEOUT_MAX_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_DEADLINE_MS: u64 = 60_000;
pub const DEFAULT_LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;
/// Longest accepted cache TTL override (30 days)
pub const MAX_CACHE_TTL_SECS: u64 = 30 * 86_400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Per-model TTL in seconds; 0 disables caching for that model.
    /// At most [`MAX_CACHE_TTL_SECS`].
    pub ttl_overrides_secs: BTreeMap<ModelId, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_overrides_secs: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub history: HistoryRequirements,
    pub params: ModelParams,
    pub node_timeout_base_ms: u64,
    pub node_timeout_per_step_ms: u64,
    pub node_timeout_max_ms: u64,
    pub request_deadline_ms: u64,
    pub cache: CacheConfig,
    /// Entries below this confidence are flagged
    pub low_confidence_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history: HistoryRequirements::default(),
            params: ModelParams::default(),
            node_timeout_base_ms: DEFAULT_NODE_TIMEOUT_BASE_MS,
            node_timeout_per_step_ms: DEFAULT_NODE_TIMEOUT_PER_STEP_MS,
            node_timeout_max_ms: DEFAULT_NODE_TIMEOUT_MAX_MS,
            request_deadline_ms: DEFAULT_REQUEST_DEADLINE_MS,
            cache: CacheConfig::default(),
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    /// Budget for one model run with `steps` horizon steps
    pub fn node_timeout(&self, steps: u32) -> Duration {
        let ms = self
            .node_timeout_base_ms
            .saturating_add(self.node_timeout_per_step_ms.saturating_mul(u64::from(steps)))
            .min(self.node_timeout_max_ms);
        Duration::from_millis(ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    /// Effective TTL for a model, `None` when its results are not cached
    pub fn cache_ttl(&self, descriptor: &ModelDescriptor) -> Option<Duration> {
        if !self.cache.enabled {
            return None;
        }
        match self.cache.ttl_overrides_secs.get(&descriptor.id) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(*secs)),
            None => descriptor.cache_ttl,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_timeout_max_ms == 0 || self.request_deadline_ms == 0 {
            return Err(PipelineError::malformed("timeouts must be positive"));
        }
        if !(0.0..=1.0).contains(&self.low_confidence_threshold) {
            return Err(PipelineError::malformed(format!(
                "low_confidence_threshold must be in [0, 1], got {}",
                self.low_confidence_threshold
            )));
        }
        if let Some((model, secs)) = self
            .cache
            .ttl_overrides_secs
            .iter()
            .find(|(_, secs)| **secs > MAX_CACHE_TTL_SECS)
        {
            return Err(PipelineError::malformed(format!(
                "cache TTL for {} is {}s, at most {}s allowed",
                model, secs, MAX_CACHE_TTL_SECS
            )));
        }
        if !(0.0..1.0).contains(&self.params.crime.contamination) {
            return Err(PipelineError::malformed("crime contamination must be in [0, 1)"));
        }
        if self.params.energy_demand.season_length < 2 {
            return Err(PipelineError::malformed("energy season_length must be at least 2"));
        }
        if self.params.energy_demand.max_history_hours < 2 * self.params.energy_demand.season_length {
            return Err(PipelineError::malformed(
                "energy max_history_hours must cover two seasons",
            ));
        }
        if self.params.urban_growth.alpha_candidates.is_empty() {
            return Err(PipelineError::malformed("at least one ridge alpha candidate is required"));
        }
        Ok(())
    }
}
