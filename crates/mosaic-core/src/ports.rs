//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the execution engine and the
//! collaborators it drives: the task queue, artifact persistence and
//! delivery, and the progress event relay.

use crate::events::ProgressEvent;
use crate::ids::BuildId;
use crate::task::{TaskError, TaskOutput, TaskRequest};
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Stream of progress events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ProgressEvent>> + Send>>;

/// Asynchronous job queue in front of the task executors.
///
/// Implementations apply their own retry policy and only report the final
/// outcome once retries are exhausted.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submit a task and wait for its terminal result.
    async fn submit(&self, request: TaskRequest) -> std::result::Result<TaskOutput, TaskError>;
}

/// Local/audit persistence of generated artifacts. Must be idempotent.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn persist(&self, build_id: &BuildId, relative_path: &str, content: &str) -> Result<()>;
}

/// Propagation of generated artifacts to the live execution target.
/// Must be idempotent.
#[async_trait]
pub trait ArtifactDelivery: Send + Sync {
    async fn deliver(&self, build_id: &BuildId, relative_path: &str, content: &str) -> Result<()>;
}

/// Broadcast channel for progress events, addressed by build id.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: ProgressEvent) -> Result<()>;

    /// Subscribe to the events of one build.
    async fn subscribe(&self, build_id: &BuildId) -> Result<EventStream>;
}
