//! Error taxonomy for the forecasting pipeline
//!
//! Runtime failures (`MalformedInput`, `InsufficientHistory`, `ModelFit`,
//! `Timeout`) are caught at the execution-node boundary and reported in the
//! bundle. `CyclicDependency` and `UnknownModel` are registry integrity
//! failures raised while building the model catalog.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::ModelId;

/// Errors produced by the pipeline and its components
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("insufficient history for {subject}: {actual} observations, need {required}")]
    InsufficientHistory {
        subject: String,
        required: usize,
        actual: usize,
    },

    #[error("model fit failed: {0}")]
    ModelFit(String),

    #[error("{model} exceeded its time budget of {}ms", .after.as_millis())]
    Timeout { model: ModelId, after: Duration },

    #[error("cyclic model dependency involving [{}]", join_ids(.0))]
    CyclicDependency(Vec<ModelId>),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("no models requested")]
    EmptyRequest,
}

impl PipelineError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        PipelineError::MalformedInput(msg.into())
    }

    pub fn fit(msg: impl Into<String>) -> Self {
        PipelineError::ModelFit(msg.into())
    }

    pub fn insufficient(subject: impl Into<String>, required: usize, actual: usize) -> Self {
        PipelineError::InsufficientHistory {
            subject: subject.into(),
            required,
            actual,
        }
    }

    /// Classification reported to bundle consumers
    pub fn kind(&self) -> ReasonKind {
        match self {
            PipelineError::MalformedInput(_)
            | PipelineError::UnknownModel(_)
            | PipelineError::EmptyRequest => ReasonKind::MalformedInputError,
            PipelineError::InsufficientHistory { .. } => ReasonKind::InsufficientHistoryError,
            PipelineError::ModelFit(_) => ReasonKind::ModelFitError,
            PipelineError::Timeout { .. } => ReasonKind::TimeoutError,
            PipelineError::CyclicDependency(_) => ReasonKind::CyclicDependencyError,
        }
    }
}

/// Failure classification carried by failed and skipped bundle entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonKind {
    MalformedInputError,
    InsufficientHistoryError,
    ModelFitError,
    TimeoutError,
    CyclicDependencyError,
    /// A required upstream model did not succeed
    UpstreamUnavailable,
}

impl std::fmt::Display for ReasonKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReasonKind::MalformedInputError => "MalformedInputError",
            ReasonKind::InsufficientHistoryError => "InsufficientHistoryError",
            ReasonKind::ModelFitError => "ModelFitError",
            ReasonKind::TimeoutError => "TimeoutError",
            ReasonKind::CyclicDependencyError => "CyclicDependencyError",
            ReasonKind::UpstreamUnavailable => "UpstreamUnavailable",
        };
        write!(f, "{}", s)
    }
}

fn join_ids(ids: &[ModelId]) -> String {
    ids.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ")
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            PipelineError::insufficient("aqi", 14, 5).kind(),
            ReasonKind::InsufficientHistoryError
        );
        assert_eq!(PipelineError::fit("singular").kind(), ReasonKind::ModelFitError);
        assert_eq!(
            PipelineError::Timeout {
                model: ModelId::Traffic,
                after: Duration::from_millis(10)
            }
            .kind(),
            ReasonKind::TimeoutError
        );
    }

    #[test]
    fn test_messages_name_the_subject() {
        let err = PipelineError::insufficient("aqi observations", 14, 5);
        let msg = err.to_string();
        assert!(msg.contains("aqi observations"));
        assert!(msg.contains("14"));
        assert!(msg.contains('5'));

        let cycle = PipelineError::CyclicDependency(vec![ModelId::Traffic, ModelId::Aqi]);
        assert!(cycle.to_string().contains("traffic, aqi"));
    }

    #[test]
    fn test_reason_kind_serializes_as_taxonomy_name() {
        let json = serde_json::to_string(&ReasonKind::InsufficientHistoryError).unwrap();
        assert_eq!(json, "\"InsufficientHistoryError\"");
    }
}
