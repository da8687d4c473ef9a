//! In-process task queue with bounded retries.

use crate::executor::{ExecutorRegistry, TaskExecutor};
use async_trait::async_trait;
use mosaic_core::ports::TaskQueue;
use mosaic_core::task::{TaskError, TaskOutput, TaskRequest};
use mosaic_trace::task_attempt_span;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, warn};

/// Retry policy applied to every submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound on a single attempt; `None` waits indefinitely.
    pub attempt_timeout_secs: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            attempt_timeout_secs: Some(600),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt following failed attempt number `attempt`
    /// (1-based): `base * 2^(attempt - 1)`, capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 1u64 << attempt.saturating_sub(1).min(30);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Task queue that runs executors in-process.
///
/// Each task gets up to `max_attempts` attempts with exponential backoff in
/// between. A timed-out attempt counts as a failed one. At most
/// `max_concurrent` attempts run at once across all submitted tasks.
pub struct RetryQueue {
    registry: Arc<ExecutorRegistry>,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl RetryQueue {
    pub fn new(registry: ExecutorRegistry, policy: RetryPolicy, max_concurrent: usize) -> Self {
        Self {
            registry: Arc::new(registry),
            policy,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt(
        &self,
        executor: &dyn TaskExecutor,
        request: &TaskRequest,
    ) -> Result<TaskOutput, TaskError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TaskError::Failed("task queue closed".to_string()))?;

        match self.policy.attempt_timeout_secs {
            Some(seconds) => {
                tokio::time::timeout(Duration::from_secs(seconds), executor.execute(request))
                    .await
                    .unwrap_or(Err(TaskError::TimedOut { seconds }))
            }
            None => executor.execute(request).await,
        }
    }
}

#[async_trait]
impl TaskQueue for RetryQueue {
    async fn submit(&self, request: TaskRequest) -> Result<TaskOutput, TaskError> {
        let executor = self
            .registry
            .get(&request.task)
            .ok_or_else(|| TaskError::UnknownKind(request.task.clone()))?;

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .attempt(executor.as_ref(), &request)
                .instrument(task_attempt_span(&request.task, attempt))
                .await;

            match result {
                Ok(mut output) => {
                    debug!(node_id = %request.node_id, attempt, "Task attempt succeeded");
                    output.attempts = attempt;
                    return Ok(output);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        node_id = %request.node_id,
                        task = %request.task,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Task attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(TaskError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::build::BuildContext;
    use mosaic_core::ids::BuildId;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn request(task: &str) -> TaskRequest {
        let build_id = BuildId::new("bld_test");
        TaskRequest {
            build_id: build_id.clone(),
            node_id: "lib/types.ts".to_string(),
            task: task.to_string(),
            description: String::new(),
            context: BuildContext::new(build_id, serde_json::Value::Null),
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            attempt_timeout_secs: None,
        }
    }

    /// Fails the first `failures` calls.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskExecutor for Flaky {
        async fn execute(&self, _request: &TaskRequest) -> Result<TaskOutput, TaskError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(TaskError::Failed(format!("call {call} failed")))
            } else {
                Ok(TaskOutput::with_artifact("lib/types.ts", "export type A = {};"))
            }
        }
    }

    struct Sleepy;

    #[async_trait]
    impl TaskExecutor for Sleepy {
        async fn execute(&self, _request: &TaskRequest) -> Result<TaskOutput, TaskError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(TaskOutput::empty())
        }
    }

    /// Tracks the highest number of overlapping calls.
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TaskExecutor for Gauge {
        async fn execute(&self, _request: &TaskRequest) -> Result<TaskOutput, TaskError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(TaskOutput::empty())
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(30_000));
        assert_eq!(policy.max_attempts, 2);
    }

    #[tokio::test]
    async fn test_second_attempt_recovers() {
        let executor = Arc::new(Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let queue = RetryQueue::new(
            ExecutorRegistry::new().with("generate-types", executor.clone()),
            fast_policy(2),
            4,
        );

        let output = queue.submit(request("generate-types")).await.unwrap();
        assert_eq!(output.attempts, 2);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let executor = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let queue = RetryQueue::new(
            ExecutorRegistry::new().with("generate-types", executor.clone()),
            fast_policy(2),
            4,
        );

        let err = queue.submit(request("generate-types")).await.unwrap_err();
        assert!(matches!(err, TaskError::Exhausted { attempts: 2, .. }));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_not_retried() {
        let queue = RetryQueue::new(ExecutorRegistry::new(), fast_policy(3), 4);
        let err = queue.submit(request("deploy")).await.unwrap_err();
        assert_eq!(err, TaskError::UnknownKind("deploy".into()));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let mut policy = fast_policy(2);
        policy.attempt_timeout_secs = Some(0);
        let queue = RetryQueue::new(
            ExecutorRegistry::new().with("start-vm", Arc::new(Sleepy)),
            policy,
            4,
        );

        let err = queue.submit(request("start-vm")).await.unwrap_err();
        match err {
            TaskError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert_eq!(*last, TaskError::TimedOut { seconds: 0 });
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let queue = Arc::new(RetryQueue::new(
            ExecutorRegistry::new().with_fallback(gauge.clone()),
            fast_policy(1),
            2,
        ));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.submit(request("generate-file")).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }
}
