//! Error types for Mosaic.

use thiserror::Error;

/// A malformed work graph. Always reported before any task is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Work graph has no nodes")]
    EmptyGraph,

    #[error("Duplicate node id: {0}")]
    DuplicateId(String),

    #[error("Node {node} depends on unknown node {dependency}")]
    UnknownDependency { node: String, dependency: String },

    #[error("Cycle detected between nodes: {}", nodes.join(" -> "))]
    Cycle { nodes: Vec<String> },
}

#[derive(Debug, Error)]
pub enum Error {
    // Graph errors
    #[error("Work graph validation failed: {0}")]
    Graph(#[from] GraphError),

    #[error("Invalid work graph document: {0}")]
    InvalidDocument(String),

    // Node errors
    #[error("Task {node_id} ({task}) failed: {message}")]
    TaskExecution {
        node_id: String,
        task: String,
        message: String,
    },

    #[error("Side effect for task {node_id} ({task}) failed: {message}")]
    SideEffect {
        node_id: String,
        task: String,
        message: String,
    },

    #[error("Integrity check failed: {completed} of {total} nodes completed")]
    Integrity { completed: usize, total: usize },

    #[error("Invalid status transition for {node_id}: {from} -> {to}")]
    InvalidTransition {
        node_id: String,
        from: String,
        to: String,
    },

    // Infrastructure errors
    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The node id and task kind of a node-level error.
    pub fn node(&self) -> Option<(&str, &str)> {
        match self {
            Error::TaskExecution { node_id, task, .. } | Error::SideEffect { node_id, task, .. } => {
                Some((node_id, task))
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
