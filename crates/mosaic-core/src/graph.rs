//! Work graph definition types.
//!
//! A [`WorkGraph`] is the complete task plan for one build: one node per
//! output file or infrastructure action, with `dependsOn` edges between them.
//! The engine treats `task`, `description` and task output as opaque values.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The complete task plan for one build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkGraph {
    pub nodes: Vec<WorkGraphNode>,
}

/// A single unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkGraphNode {
    /// Stable task identifier, typically the target artifact path.
    pub id: String,
    /// Task kind, interpreted by the executor.
    pub task: String,
    /// Context forwarded to the executor.
    #[serde(default)]
    pub description: String,
    /// Ids of the nodes that must complete before this one may run.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub status: NodeStatus,
}

impl WorkGraphNode {
    pub fn new(id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            description: String::new(),
            depends_on: Vec::new(),
            status: NodeStatus::Pending,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// Per-node lifecycle: `pending -> running -> {completed | failed}`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Failed)
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (NodeStatus::Pending, NodeStatus::Running)
                | (NodeStatus::Running, NodeStatus::Completed)
                | (NodeStatus::Running, NodeStatus::Failed)
        )
    }

    /// Advance to `next`, rejecting anything but a forward transition.
    pub fn advance(&mut self, node_id: &str, next: NodeStatus) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                node_id: node_id.to_string(),
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Output envelope written by the planning stage.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlannerEnvelope {
    status: Option<String>,
    work_graph: Option<WorkGraph>,
    error: Option<String>,
}

impl WorkGraph {
    pub fn new(nodes: Vec<WorkGraphNode>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&WorkGraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Parse a work graph from JSON.
    ///
    /// Accepts either a bare `{ "nodes": [...] }` document or the planner's
    /// `{ "status": ..., "workGraph": {...} }` envelope. A failed planner
    /// envelope is reported with the planner's own error message.
    pub fn from_json(input: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(input)?;

        if value.get("nodes").is_some() {
            return Ok(serde_json::from_value(value)?);
        }

        let envelope: PlannerEnvelope = serde_json::from_value(value)?;
        match envelope.work_graph {
            Some(graph) => Ok(graph),
            None => Err(Error::InvalidDocument(match (envelope.status, envelope.error) {
                (Some(status), Some(error)) => format!("{}: {}", status, error),
                (None, Some(error)) => error,
                (Some(status), None) => format!("{} without a workGraph", status),
                (None, None) => "document has neither nodes nor workGraph".to_string(),
            })),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        let mut status = NodeStatus::Pending;
        status.advance("a", NodeStatus::Running).unwrap();
        status.advance("a", NodeStatus::Completed).unwrap();
        assert!(status.is_terminal());

        let err = status.advance("a", NodeStatus::Running).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_running_entered_once() {
        let mut status = NodeStatus::Running;
        assert!(status.advance("a", NodeStatus::Running).is_err());
        assert!(!NodeStatus::Pending.can_transition_to(NodeStatus::Completed));
    }

    #[test]
    fn test_parse_bare_graph() {
        let graph = WorkGraph::from_json(
            r#"{"nodes":[{"id":"start-vm","task":"start-vm","description":"Start the VM","dependsOn":[]}]}"#,
        )
        .unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.nodes[0].status, NodeStatus::Pending);
    }

    #[test]
    fn test_parse_failed_envelope() {
        let err = WorkGraph::from_json(
            r#"{"status":"WORK_GRAPH_AGENT_FAILED","error":"quota exceeded"}"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid work graph document: WORK_GRAPH_AGENT_FAILED: quota exceeded"
        );
    }
}
