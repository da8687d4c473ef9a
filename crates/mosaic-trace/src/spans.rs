//! Span creation for build orchestration.

use tracing::{Level, Span, span};

/// Build span attributes.
#[derive(Debug, Clone, Default)]
pub struct BuildAttributes {
    pub build_id: Option<String>,
    pub node_count: Option<usize>,
    pub policy: Option<String>,
    pub node_id: Option<String>,
    pub task: Option<String>,
}

impl BuildAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(mut self, id: impl Into<String>, node_count: usize) -> Self {
        self.build_id = Some(id.into());
        self.node_count = Some(node_count);
        self
    }

    pub fn policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn node(mut self, id: impl Into<String>, task: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self.task = Some(task.into());
        self
    }
}

/// Create a span for a whole build.
pub fn build_span(attrs: &BuildAttributes) -> Span {
    span!(
        Level::INFO,
        "build.execute",
        build.id = attrs.build_id.as_deref().unwrap_or(""),
        build.nodes = attrs.node_count.unwrap_or(0),
        build.policy = attrs.policy.as_deref().unwrap_or(""),
    )
}

/// Create a span for one scheduling round.
pub fn wave_span(build_id: &str, round: usize, width: usize) -> Span {
    span!(
        Level::INFO,
        "build.wave",
        build.id = build_id,
        wave.index = round,
        wave.width = width,
    )
}

/// Create a span for one dispatched node.
pub fn node_span(attrs: &BuildAttributes) -> Span {
    span!(
        Level::INFO,
        "node.dispatch",
        build.id = attrs.build_id.as_deref().unwrap_or(""),
        node.id = attrs.node_id.as_deref().unwrap_or(""),
        node.task = attrs.task.as_deref().unwrap_or(""),
    )
}

/// Create a span for a single executor attempt.
pub fn task_attempt_span(task: &str, attempt: u32) -> Span {
    span!(Level::DEBUG, "task.attempt", task.kind = task, attempt = attempt)
}
