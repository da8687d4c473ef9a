//! Task executors, keyed by task kind.

use async_trait::async_trait;
use mosaic_core::task::{TaskError, TaskOutput, TaskRequest};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Runs one attempt of a task.
///
/// Implementations are free to be slow or to fail; retries and timeouts are
/// applied by the queue in front of them.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, request: &TaskRequest) -> Result<TaskOutput, TaskError>;
}

/// Lookup table from task kind to executor.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
    fallback: Option<Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for a task kind, replacing any previous one.
    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        let kind = kind.into();
        info!(task = %kind, "Registering task executor");
        self.executors.insert(kind, executor);
    }

    pub fn with(mut self, kind: impl Into<String>, executor: Arc<dyn TaskExecutor>) -> Self {
        self.register(kind, executor);
        self
    }

    /// Executor used for kinds with no explicit registration.
    pub fn with_fallback(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.fallback = Some(executor);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors
            .get(kind)
            .or(self.fallback.as_ref())
            .cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl TaskExecutor for Fixed {
        async fn execute(&self, _request: &TaskRequest) -> Result<TaskOutput, TaskError> {
            Ok(TaskOutput::with_side_result(serde_json::json!(self.0)))
        }
    }

    #[test]
    fn test_lookup_prefers_explicit_kind() {
        let registry = ExecutorRegistry::new()
            .with("start-vm", Arc::new(Fixed("vm")))
            .with_fallback(Arc::new(Fixed("fallback")));

        assert!(registry.get("start-vm").is_some());
        assert!(registry.get("generate-types").is_some());
        assert_eq!(registry.kinds(), vec!["start-vm"]);
    }

    #[test]
    fn test_unknown_kind_without_fallback() {
        let registry = ExecutorRegistry::new().with("start-vm", Arc::new(Fixed("vm")));
        assert!(registry.get("generate-types").is_none());
        assert!(!registry.has_fallback());
    }
}
