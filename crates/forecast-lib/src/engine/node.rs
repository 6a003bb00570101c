//! Per-request execution node
//!
//! One node per planned model. Status moves forward only:
//!
//! - `Pending -> Running -> Succeeded | Failed`
//! - `Pending -> Failed` for input, horizon and deadline failures
//! - `Pending -> Skipped` when a required upstream did not succeed

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::algorithms::ModelResult;
use crate::error::{PipelineError, ReasonKind};
use crate::features::FeatureRecord;
use crate::models::{Horizon, ModelId};
use crate::registry::ModelDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn can_transition_to(&self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Skipped)
                | (Pending, Succeeded)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a node failed or was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub kind: ReasonKind,
    pub reason: String,
}

impl From<&PipelineError> for NodeFailure {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionNode<'a> {
    pub descriptor: &'a ModelDescriptor,
    /// Merged domain features plus injected upstream outputs
    pub input: Option<Arc<FeatureRecord>>,
    pub horizon: Option<Horizon>,
    status: NodeStatus,
    result: Option<Arc<ModelResult>>,
    failure: Option<NodeFailure>,
    duration: Duration,
    cached: bool,
}

impl<'a> ExecutionNode<'a> {
    pub fn new(descriptor: &'a ModelDescriptor) -> Self {
        Self {
            descriptor,
            input: None,
            horizon: None,
            status: NodeStatus::Pending,
            result: None,
            failure: None,
            duration: Duration::ZERO,
            cached: false,
        }
    }

    pub fn model(&self) -> ModelId {
        self.descriptor.id
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn result(&self) -> Option<&Arc<ModelResult>> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&NodeFailure> {
        self.failure.as_ref()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == NodeStatus::Succeeded
    }

    /// Returns false when the node is not in a state that may start
    pub fn start(&mut self) -> bool {
        self.advance(NodeStatus::Running)
    }

    pub fn succeed(&mut self, result: Arc<ModelResult>, duration: Duration, cached: bool) -> bool {
        if !self.advance(NodeStatus::Succeeded) {
            return false;
        }
        self.result = Some(result);
        self.duration = duration;
        self.cached = cached;
        true
    }

    pub fn fail(&mut self, err: &PipelineError, duration: Duration) -> bool {
        if !self.advance(NodeStatus::Failed) {
            return false;
        }
        self.failure = Some(NodeFailure::from(err));
        self.duration = duration;
        true
    }

    pub fn skip(&mut self, upstream: ModelId, upstream_status: NodeStatus) -> bool {
        if !self.advance(NodeStatus::Skipped) {
            return false;
        }
        self.failure = Some(NodeFailure {
            kind: ReasonKind::UpstreamUnavailable,
            reason: format!(
                "required upstream {} is {}",
                upstream, upstream_status
            ),
        });
        true
    }

    fn advance(&mut self, next: NodeStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }
}
