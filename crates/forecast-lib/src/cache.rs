//! Result cache keyed by model and input fingerprint
//!
//! The only state shared across requests. Entries expire after the model's
//! TTL; an expired entry is evicted when read, may be replaced by the
//! next writer, and is swept by [`ResultCache::purge_expired`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::algorithms::ModelResult;
use crate::error::{PipelineError, Result};
use crate::features::FeatureRecord;
use crate::models::{Horizon, ModelId};

/// Hex SHA-256 over the canonical JSON of a model's inputs
pub fn fingerprint(record: &FeatureRecord, horizon: Horizon, params: &serde_json::Value) -> Result<String> {
    #[derive(Serialize)]
    struct Canonical<'a> {
        record: &'a FeatureRecord,
        horizon: Horizon,
        params: &'a serde_json::Value,
    }

    let bytes = serde_json::to_vec(&Canonical {
        record,
        horizon,
        params,
    })
    .map_err(|e| PipelineError::malformed(format!("unable to fingerprint input: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub model: ModelId,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(model: ModelId, fingerprint: impl Into<String>) -> Self {
        Self {
            model,
            fingerprint: fingerprint.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: Arc<ModelResult>,
    /// `None` when the TTL runs past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unexpired result for `key`
    pub fn get(&self, key: &CacheKey) -> Option<Arc<ModelResult>> {
        let now = Instant::now();
        let found = self.entries.get(key).map(|e| e.clone());
        match found {
            Some(entry) if entry.is_live(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.result)
            }
            Some(_) => {
                // only evict if nobody refreshed the entry meanwhile
                if self
                    .entries
                    .remove_if(key, |_, e| !e.is_live(Instant::now()))
                    .is_some()
                {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(model = %key.model, "Evicted expired cache entry");
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts unless a live entry exists; returns whichever entry is stored
    pub fn put_if_absent(&self, key: CacheKey, result: Arc<ModelResult>, ttl: Duration) -> Arc<ModelResult> {
        let now = Instant::now();
        let fresh = CacheEntry {
            result: result.clone(),
            expires_at: now.checked_add(ttl),
        };
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    occupied.get().result.clone()
                } else {
                    occupied.insert(fresh);
                    self.insertions.fetch_add(1, Ordering::Relaxed);
                    result
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                self.insertions.fetch_add(1, Ordering::Relaxed);
                result
            }
        }
    }

    /// Drops every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Small transit result for cache tests
#[cfg(test)]
pub(crate) fn sample_result(confidence: f64) -> Arc<ModelResult> {
    use crate::algorithms::output::{ModelOutput, Reliability};
    use crate::algorithms::transit::{CoverageGap, TransitPlan};

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
