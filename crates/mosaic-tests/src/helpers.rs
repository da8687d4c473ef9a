//! Scripted collaborators and a harness wiring them into a controller.

use async_trait::async_trait;
use futures::StreamExt;
use mosaic_core::build::BuildOutcome;
use mosaic_core::events::ProgressEvent;
use mosaic_core::graph::WorkGraph;
use mosaic_core::ids::BuildId;
use mosaic_core::ports::{ArtifactDelivery, ArtifactStore, EventBus};
use mosaic_core::task::{TaskError, TaskOutput, TaskRequest};
use mosaic_core::{Error, Result};
use mosaic_scheduler::{
    BroadcastEventBus, Dispatcher, ExecutorRegistry, PipelineController, RetryPolicy, RetryQueue,
    SchedulingPolicy, TaskExecutor,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Start,
    End,
}

/// One entry of an executor's journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub node_id: String,
    pub mark: Mark,
    pub seq: usize,
}

/// Executor driven by a script: per-node delays, failures and side results.
/// Every attempt is journaled with a global sequence number.
#[derive(Default)]
pub struct ScriptedExecutor {
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
    side_results: HashMap<String, serde_json::Value>,
    panics: HashSet<String>,
    journal: Mutex<Vec<Entry>>,
    seq: AtomicUsize,
    requests: Mutex<Vec<TaskRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, node_id: &str, delay: Duration) -> Self {
        self.delays.insert(node_id.to_string(), delay);
        self
    }

    /// Every attempt of `node_id` fails.
    pub fn fail(mut self, node_id: &str) -> Self {
        self.failures.insert(node_id.to_string());
        self
    }

    pub fn panic_on(mut self, node_id: &str) -> Self {
        self.panics.insert(node_id.to_string());
        self
    }

    /// `node_id` produces no artifact and reports `value` instead.
    pub fn side_result(mut self, node_id: &str, value: serde_json::Value) -> Self {
        self.side_results.insert(node_id.to_string(), value);
        self
    }

    pub fn journal(&self) -> Vec<Entry> {
        lock(&self.journal).clone()
    }

    pub fn requests(&self) -> Vec<TaskRequest> {
        lock(&self.requests).clone()
    }

    /// Node ids in the order they were first started.
    pub fn started(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.journal()
            .into_iter()
            .filter(|e| e.mark == Mark::Start && seen.insert(e.node_id.clone()))
            .map(|e| e.node_id)
            .collect()
    }

    pub fn attempts(&self, node_id: &str) -> usize {
        self.journal()
            .iter()
            .filter(|e| e.mark == Mark::Start && e.node_id == node_id)
            .count()
    }

    fn mark(&self, node_id: &str, mark: Mark) -> usize {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        lock(&self.journal).push(Entry {
            node_id: node_id.to_string(),
            mark,
            seq,
        });
        seq
    }

    /// Sequence number of the first start of `node_id`.
    pub fn first_start(&self, node_id: &str) -> Option<usize> {
        self.journal()
            .iter()
            .find(|e| e.mark == Mark::Start && e.node_id == node_id)
            .map(|e| e.seq)
    }

    /// Sequence number of the last end of `node_id`.
    pub fn last_end(&self, node_id: &str) -> Option<usize> {
        self.journal()
            .iter()
            .rev()
            .find(|e| e.mark == Mark::End && e.node_id == node_id)
            .map(|e| e.seq)
    }

    /// Whether some start of `a` and some start of `b` both happened before
    /// either of them ended.
    pub fn overlapped(&self, a: &str, b: &str) -> bool {
        match (
            self.first_start(a),
            self.first_start(b),
            self.last_end(a),
            self.last_end(b),
        ) {
            (Some(sa), Some(sb), Some(ea), Some(eb)) => sa.max(sb) < ea.min(eb),
            _ => false,
        }
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, request: &TaskRequest) -> std::result::Result<TaskOutput, TaskError> {
        let node_id = request.node_id.as_str();
        lock(&self.requests).push(request.clone());
        self.mark(node_id, Mark::Start);

        if let Some(delay) = self.delays.get(node_id) {
            tokio::time::sleep(*delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        if self.panics.contains(node_id) {
            self.mark(node_id, Mark::End);
            panic!("scripted panic in {}", node_id);
        }

        let result = if self.failures.contains(node_id) {
            Err(TaskError::Failed(format!("scripted failure in {}", node_id)))
        } else if let Some(value) = self.side_results.get(node_id) {
            Ok(TaskOutput::with_side_result(value.clone()))
        } else {
            Ok(TaskOutput::with_artifact(
                "",
                format!("// {} generated by {}", node_id, request.task),
            ))
        };
        self.mark(node_id, Mark::End);
        result
    }
}

/// Fails the first `failures` attempts of every node, then succeeds.
pub struct FlakyExecutor {
    failures: usize,
    attempts: Mutex<HashMap<String, usize>>,
}

impl FlakyExecutor {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn attempts(&self, node_id: &str) -> usize {
        lock(&self.attempts).get(node_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TaskExecutor for FlakyExecutor {
    async fn execute(&self, request: &TaskRequest) -> std::result::Result<TaskOutput, TaskError> {
        let attempt = {
            let mut attempts = lock(&self.attempts);
            let count = attempts.entry(request.node_id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempt <= self.failures {
            return Err(TaskError::TimedOut { seconds: 1 });
        }
        Ok(TaskOutput::with_artifact("", format!("attempt {}", attempt)))
    }
}

/// In-memory artifact store keyed by `(build id, relative path)`.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<(String, String), String>>,
    writes: AtomicUsize,
    fail_on: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisting `path` fails from now on.
    pub fn fail_on(&self, path: &str) {
        lock(&self.fail_on).insert(path.to_string());
    }

    pub fn get(&self, build_id: &BuildId, path: &str) -> Option<String> {
        lock(&self.files)
            .get(&(build_id.as_str().to_string(), path.to_string()))
            .cloned()
    }

    pub fn paths(&self, build_id: &BuildId) -> Vec<String> {
        let mut paths: Vec<String> = lock(&self.files)
            .keys()
            .filter(|(b, _)| b == build_id.as_str())
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn persist(&self, build_id: &BuildId, relative_path: &str, content: &str) -> Result<()> {
        if lock(&self.fail_on).contains(relative_path) {
            return Err(Error::Artifact(format!("disk full writing {}", relative_path)));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.files).insert(
            (build_id.as_str().to_string(), relative_path.to_string()),
            content.to_string(),
        );
        Ok(())
    }
}

/// Records every delivery; optionally rejects them all.
#[derive(Default)]
pub struct RecordingDelivery {
    delivered: Mutex<Vec<(String, String)>>,
    reject: bool,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    /// `(build id, relative path)` pairs, in delivery order.
    pub fn delivered(&self) -> Vec<(String, String)> {
        lock(&self.delivered).clone()
    }
}

#[async_trait]
impl ArtifactDelivery for RecordingDelivery {
    async fn deliver(&self, build_id: &BuildId, relative_path: &str, _content: &str) -> Result<()> {
        if self.reject {
            return Err(Error::Network(format!(
                "upload-file returned 404: Session {} not found.",
                build_id
            )));
        }
        lock(&self.delivered).push((build_id.as_str().to_string(), relative_path.to_string()));
        Ok(())
    }
}

/// Retry policy fast enough for tests: two attempts, millisecond backoff.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
        attempt_timeout_secs: Some(5),
    }
}

/// A controller wired to in-memory collaborators.
pub struct Harness {
    pub bus: Arc<BroadcastEventBus>,
    pub store: Arc<MemoryStore>,
    pub delivery: Arc<RecordingDelivery>,
    controller: PipelineController,
}

impl Harness {
    pub fn new(executor: Arc<dyn TaskExecutor>, policy: SchedulingPolicy) -> Self {
        Self::with_collaborators(
            executor,
            policy,
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingDelivery::new()),
        )
    }

    pub fn with_collaborators(
        executor: Arc<dyn TaskExecutor>,
        policy: SchedulingPolicy,
        store: Arc<MemoryStore>,
        delivery: Arc<RecordingDelivery>,
    ) -> Self {
        let registry = ExecutorRegistry::new().with_fallback(executor);
        let queue = RetryQueue::new(registry, fast_retry(), 16);
        let dispatcher =
            Dispatcher::new(Arc::new(queue), store.clone()).with_delivery(delivery.clone());
        let bus = Arc::new(BroadcastEventBus::new(4096));
        let controller = PipelineController::new(dispatcher, bus.clone()).with_policy(policy);

        Self {
            bus,
            store,
            delivery,
            controller,
        }
    }

    pub async fn run(&self, graph: WorkGraph, build_id: &str) -> Result<BuildOutcome> {
        self.controller
            .run(graph, crate::fixtures::build_context(build_id))
            .await
    }

    /// Run and also collect every progress event of the build.
    pub async fn run_collecting(
        &self,
        graph: WorkGraph,
        build_id: &str,
    ) -> (Result<BuildOutcome>, Vec<ProgressEvent>) {
        let id = BuildId::new(build_id);
        let subscription = self.bus.subscribe(&id).await;
        let result = self.run(graph, build_id).await;

        let mut events = Vec::new();
        if let Ok(mut stream) = subscription {
            // The controller flushes its reporter before returning, so
            // everything is already buffered.
            while let Ok(Some(Ok(event))) =
                tokio::time::timeout(Duration::from_millis(200), stream.next()).await
            {
                let last = event.node_id.is_none() && event.status.is_terminal();
                events.push(event);
                if last {
                    break;
                }
            }
        }
        (result, events)
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}
