//! Progress events addressed by build id.

use crate::ids::BuildId;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Subject prefix shared by every progress event.
pub const SUBJECT_PREFIX: &str = "build";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Active,
    Completed,
    Error,
}

impl ProgressStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressStatus::Active)
    }
}

/// One status transition, as seen by an observer of the build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub build_id: BuildId,
    /// Human-readable reference to the node or phase.
    pub step: String,
    pub status: ProgressStatus,
    #[serde(default)]
    pub details: String,
    /// Set when the event concerns a single node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Side results carried on the terminal success event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_result: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        build_id: BuildId,
        step: impl Into<String>,
        status: ProgressStatus,
        details: impl Into<String>,
    ) -> Self {
        Self {
            build_id,
            step: step.into(),
            status,
            details: details.into(),
            node_id: None,
            side_result: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_side_result(mut self, side_result: Option<serde_json::Value>) -> Self {
        self.side_result = side_result;
        self
    }

    /// Subject this event is published on: `build.<id>.progress`.
    pub fn subject(&self) -> String {
        subject_for(&self.build_id)
    }
}

pub fn subject_for(build_id: &BuildId) -> String {
    format!("{}.{}.progress", SUBJECT_PREFIX, build_id.subject_token())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_is_addressed_by_build() {
        let event = ProgressEvent::new(
            BuildId::new("session.7"),
            "generate-types: lib/types.ts",
            ProgressStatus::Active,
            "",
        );
        assert_eq!(event.subject(), "build.session_7.progress");
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let event = ProgressEvent::new(BuildId::new("b1"), "Build", ProgressStatus::Completed, "ok")
            .with_side_result(Some(serde_json::json!({"start-vm": "http://localhost:3000"})));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["buildId"], "b1");
        assert_eq!(json["status"], "completed");
        assert!(json.get("nodeId").is_none());
        assert_eq!(json["sideResult"]["start-vm"], "http://localhost:3000");
    }
}
