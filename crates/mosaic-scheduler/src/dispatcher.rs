//! Dispatch of a single node to the task queue.

use crate::dag::DagNode;
use mosaic_core::build::BuildContext;
use mosaic_core::ports::{ArtifactDelivery, ArtifactStore, TaskQueue};
use mosaic_core::task::{TaskOutput, TaskRequest, artifact_path_for};
use mosaic_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Submits nodes to the task queue and applies artifact side effects.
///
/// The dispatcher never retries; it sees one terminal result per node from
/// the queue. A generated artifact is persisted, then delivered, before the
/// output is handed back. Failure of either step fails the node.
pub struct Dispatcher {
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn ArtifactStore>,
    delivery: Option<Arc<dyn ArtifactDelivery>>,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            queue,
            store,
            delivery: None,
        }
    }

    /// Also propagate artifacts to the live execution target.
    pub fn with_delivery(mut self, delivery: Arc<dyn ArtifactDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub async fn dispatch(&self, node: &DagNode, context: &BuildContext) -> Result<TaskOutput> {
        let request = TaskRequest {
            build_id: context.build_id.clone(),
            node_id: node.id.clone(),
            task: node.task.clone(),
            description: node.description.clone(),
            context: context.clone(),
        };

        let mut output = self
            .queue
            .submit(request)
            .await
            .map_err(|e| Error::TaskExecution {
                node_id: node.id.clone(),
                task: node.task.clone(),
                message: e.to_string(),
            })?;

        if let Some(artifact) = output.artifact.as_mut() {
            let path = match artifact.path.trim() {
                "" => artifact_path_for(&node.id),
                explicit => explicit,
            }
            .to_string();
            let side_effect = |step: &str, e: Error| Error::SideEffect {
                node_id: node.id.clone(),
                task: node.task.clone(),
                message: format!("{} {}: {}", step, path, e),
            };

            self.store
                .persist(&context.build_id, &path, &artifact.content)
                .await
                .map_err(|e| side_effect("persist", e))?;
            debug!(node_id = %node.id, path = %path, "Artifact persisted");

            if let Some(delivery) = &self.delivery {
                delivery
                    .deliver(&context.build_id, &path, &artifact.content)
                    .await
                    .map_err(|e| side_effect("deliver", e))?;
                debug!(node_id = %node.id, path = %path, "Artifact delivered");
            }
            artifact.path = path;
        }

        info!(
            node_id = %node.id,
            task = %node.task,
            attempts = output.attempts,
            "Node dispatched successfully"
        );
        Ok(output)
    }
}
