//! Build context and terminal build outcome.

use crate::graph::NodeStatus;
use crate::ids::BuildId;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-build immutable payload threaded through every dispatched task.
/// The engine forwards `plan` without inspecting it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildContext {
    pub build_id: BuildId,
    #[serde(default)]
    pub plan: serde_json::Value,
}

impl BuildContext {
    pub fn new(build_id: BuildId, plan: serde_json::Value) -> Self {
        Self { build_id, plan }
    }
}

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Initializing,
    Running,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed)
    }
}

/// Which error class ended the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TaskExecution,
    SideEffect,
    Integrity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailureCause {
    pub kind: FailureKind,
    pub node_id: Option<String>,
    pub task: Option<String>,
    pub message: String,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.node_id, &self.task) {
            (Some(node), Some(task)) => write!(f, "{} ({}): {}", node, task, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Terminal result of a build.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub build_id: BuildId,
    pub success: bool,
    pub state: PipelineState,
    pub cause: Option<FailureCause>,
    /// Side results keyed by node id, as a JSON object.
    pub side_result: Option<serde_json::Value>,
    pub completed: usize,
    pub total: usize,
    /// Number of scheduling rounds started.
    pub rounds: usize,
    pub statuses: BTreeMap<String, NodeStatus>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildOutcome {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }

    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.statuses.get(node_id).copied()
    }
}
