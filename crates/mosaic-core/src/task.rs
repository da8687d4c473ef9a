//! Task execution boundary types.

use crate::build::BuildContext;
use crate::ids::BuildId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The payload submitted to the task queue for one node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub build_id: BuildId,
    pub node_id: String,
    pub task: String,
    pub description: String,
    pub context: BuildContext,
}

/// A file produced by a generation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    pub path: String,
    pub content: String,
}

/// What an executor reports back on success.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutput {
    /// Generated file, persisted and delivered before the node completes.
    #[serde(default)]
    pub artifact: Option<Artifact>,
    /// Side-channel result of non-generation tasks, e.g. a preview URL.
    #[serde(default)]
    pub side_result: Option<serde_json::Value>,
    /// Number of attempts the queue needed.
    #[serde(default)]
    pub attempts: u32,
}

impl TaskOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_artifact(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            artifact: Some(Artifact {
                path: path.into(),
                content: content.into(),
            }),
            ..Self::default()
        }
    }

    pub fn with_side_result(value: serde_json::Value) -> Self {
        Self {
            side_result: Some(value),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("no executor registered for task kind `{0}`")]
    UnknownKind(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<TaskError> },
}

impl TaskError {
    /// Whether another attempt could change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Failed(_) | TaskError::TimedOut { .. })
    }
}

/// Relative artifact path for a node when the executor names none.
///
/// Node ids are usually the artifact path itself (`lib/types.ts`); ids with a
/// verb prefix (`generate:app/page.tsx`) drop the prefix.
pub fn artifact_path_for(node_id: &str) -> &str {
    match node_id.split_once(':') {
        Some((verb, rest)) if !verb.is_empty() && !verb.contains('/') && !rest.is_empty() => rest,
        _ => node_id,
    }
}
