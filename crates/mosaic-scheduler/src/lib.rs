//! Work graph scheduling and pipeline control for Mosaic.
//!
//! - [`dag`]: validation and the in-degree ready set
//! - [`executor`] and [`queue`]: task executors behind a retrying queue
//! - [`dispatcher`]: one node through the queue and its artifact side effects
//! - [`reporter`]: ordered, fire-and-forget progress events
//! - [`controller`]: the build state machine tying them together

pub mod controller;
pub mod dag;
pub mod dispatcher;
pub mod executor;
pub mod queue;
pub mod reporter;

pub use controller::{EngineConfig, PipelineController, SchedulingPolicy};
pub use dag::{DagBuilder, DagNode, ReadySet, WorkDag, validate};
pub use dispatcher::Dispatcher;
pub use executor::{ExecutorRegistry, TaskExecutor};
pub use queue::{RetryPolicy, RetryQueue};
pub use reporter::{BroadcastEventBus, ProgressReporter};

impl EngineConfig {
    /// Build the retrying queue this configuration describes.
    pub fn queue(&self, registry: ExecutorRegistry) -> RetryQueue {
        RetryQueue::new(registry, self.retry.clone(), self.max_concurrent_tasks)
    }
}
