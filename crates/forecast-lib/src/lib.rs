//! Multi-model urban forecasting pipeline
//!
//! This crate provides:
//! - Feature adaptation of raw traffic, weather, AQI, demographic, energy,
//!   incident, mobility and parcel payloads
//! - A registry of seven forecasting models and their dependency DAG
//! - Numeric estimators and the per-model forecasting algorithms
//! - A batch-parallel execution engine with chained outputs
//! - Result aggregation with partial-failure isolation
//! - A TTL result cache, metrics and structured logging

pub mod aggregator;
pub mod algorithms;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimators;
pub mod features;
pub mod models;
pub mod observability;
pub mod registry;

pub use aggregator::{EntryStatus, ForecastBundle, ModelEntry};
pub use algorithms::{Algorithm, ModelOutput, ModelParams, ModelResult, Reliability};
pub use cache::{CacheKey, CacheStats, ResultCache};
pub use config::{CacheConfig, PipelineConfig};
pub use engine::{ForecastPipeline, ForecastRequest, NodeStatus, PipelineStats};
pub use error::{PipelineError, ReasonKind, Result};
pub use features::{FeatureAdapter, FeatureRecord, HistoryRequirements, RawPayloads};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use registry::{Batch, ModelDescriptor, ModelRegistry};
