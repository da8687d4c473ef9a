//! Progress reporting.
//!
//! [`ProgressReporter`] is the fire-and-forget side the controller talks to.
//! Events go through an unbounded channel into a single relay task that
//! publishes them to the [`EventBus`] one at a time, so the order in which a
//! node's transitions are reported is the order observers see them in.

use async_trait::async_trait;
use futures::stream;
use mosaic_core::events::{ProgressEvent, ProgressStatus};
use mosaic_core::ids::BuildId;
use mosaic_core::ports::{EventBus, EventStream};
use mosaic_core::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct ProgressReporter {
    sender: mpsc::UnboundedSender<ProgressEvent>,
    relay: JoinHandle<()>,
}

impl ProgressReporter {
    /// Start a relay publishing to `bus`.
    pub fn spawn(bus: Arc<dyn EventBus>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<ProgressEvent>();
        let relay = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let step = event.step.clone();
                if let Err(e) = bus.publish(event).await {
                    warn!(step = %step, error = %e, "Dropping progress event");
                }
            }
        });
        Self { sender, relay }
    }

    /// Queue an event for publishing. Never blocks and never fails.
    pub fn emit(&self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            debug!("Progress relay has stopped, event discarded");
        }
    }

    pub fn report(
        &self,
        build_id: &BuildId,
        step: impl Into<String>,
        status: ProgressStatus,
        details: impl Into<String>,
    ) {
        self.emit(ProgressEvent::new(build_id.clone(), step, status, details));
    }

    /// Flush queued events and stop the relay.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.relay.await {
            warn!(error = %e, "Progress relay ended abnormally");
        }
    }
}

/// In-memory broadcast bus.
///
/// Subscribers only see events published after they subscribed. A
/// subscriber that falls more than `capacity` events behind skips the
/// overflow.
#[derive(Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: ProgressEvent) -> Result<()> {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }

    async fn subscribe(&self, build_id: &BuildId) -> Result<EventStream> {
        let receiver = self.sender.subscribe();
        let build_id = build_id.clone();

        let events = stream::unfold(receiver, move |mut receiver| {
            let build_id = build_id.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) if event.build_id == build_id => {
                            return Some((Ok(event), receiver));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(build_id = %build_id, skipped, "Progress subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_subscriber_sees_only_its_build() {
        let bus = BroadcastEventBus::default();
        let mut stream = bus.subscribe(&BuildId::new("mine")).await.unwrap();

        bus.publish(ProgressEvent::new(BuildId::new("other"), "x", ProgressStatus::Active, ""))
            .await
            .unwrap();
        bus.publish(ProgressEvent::new(BuildId::new("mine"), "y", ProgressStatus::Active, ""))
            .await
            .unwrap();

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.step, "y");
    }

    #[tokio::test]
    async fn test_reporter_preserves_order_and_flushes() {
        let bus = Arc::new(BroadcastEventBus::default());
        let build_id = BuildId::new("bld_order");
        let stream = bus.subscribe(&build_id).await.unwrap();

        let reporter = ProgressReporter::spawn(bus.clone());
        for i in 0..50 {
            reporter.report(&build_id, format!("step-{i}"), ProgressStatus::Active, "");
        }
        reporter.shutdown().await;

        let steps: Vec<String> = stream
            .take(50)
            .map(|e| e.unwrap().step)
            .collect()
            .await;
        let expected: Vec<String> = (0..50).map(|i| format!("step-{i}")).collect();
        assert_eq!(steps, expected);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = BroadcastEventBus::new(4);
        let result = bus
            .publish(ProgressEvent::new(BuildId::new("b"), "x", ProgressStatus::Completed, ""))
            .await;
        tokio_test::assert_ok!(result);
    }
}
