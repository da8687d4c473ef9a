//! Progress event tests.
//!
//! The NATS tests need docker and run with:
//! `cargo test -p mosaic-tests --test eventbus_tests --features integration`

use mosaic_core::events::ProgressStatus;
use mosaic_scheduler::SchedulingPolicy;
use mosaic_tests::{GraphFixture, Harness, ScriptedExecutor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_node_events_are_causally_ordered() {
    for policy in [SchedulingPolicy::Wave, SchedulingPolicy::Greedy] {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .delay("leaf0", Duration::from_millis(10))
                .delay("leaf5", Duration::from_millis(5))
                .fail("leaf7"),
        );
        let harness = Harness::new(executor, policy);

        let (result, events) = harness.run_collecting(GraphFixture::wide(10), "bld_events").await;
        let outcome = result.unwrap();
        assert!(!outcome.success);

        assert_eq!(events.first().unwrap().step, "Initializing");
        let terminal = events.last().unwrap();
        assert_eq!(terminal.step, "Build");
        assert_eq!(terminal.status, ProgressStatus::Error);
        assert!(terminal.details.contains("leaf7"));

        let mut seen: HashMap<&str, Vec<ProgressStatus>> = HashMap::new();
        for event in &events {
            if let Some(node_id) = event.node_id.as_deref() {
                seen.entry(node_id).or_default().push(event.status);
            }
        }
        for (node_id, statuses) in &seen {
            assert_eq!(statuses.len(), 2, "{node_id}: {statuses:?}");
            assert_eq!(statuses[0], ProgressStatus::Active, "{node_id}");
            assert!(statuses[1].is_terminal(), "{node_id}");
        }
        assert_eq!(seen.get("leaf7").unwrap()[1], ProgressStatus::Error);
        assert!(!seen.contains_key("sink"));
    }
}

#[tokio::test]
async fn test_events_are_addressed_by_build() {
    let harness = Harness::new(Arc::new(ScriptedExecutor::new()), SchedulingPolicy::Wave);

    let (_, first) = harness.run_collecting(GraphFixture::pair(), "bld_one").await;
    let (_, second) = harness.run_collecting(GraphFixture::fan_in(), "bld_two").await;

    assert!(first.iter().all(|e| e.build_id.as_str() == "bld_one"));
    assert!(second.iter().all(|e| e.build_id.as_str() == "bld_two"));
    assert_eq!(first.iter().filter(|e| e.node_id.is_some()).count(), 4);
    assert_eq!(second.iter().filter(|e| e.node_id.is_some()).count(), 6);
}

#[cfg(feature = "integration")]
mod nats {
    use futures::StreamExt;
    use mosaic_core::build::BuildContext;
    use mosaic_core::events::ProgressStatus;
    use mosaic_core::ids::BuildId;
    use mosaic_core::ports::EventBus;
    use mosaic_scheduler::{Dispatcher, ExecutorRegistry, PipelineController, RetryQueue};
    use mosaic_tests::containers::NatsContainer;
    use mosaic_tests::{GraphFixture, MemoryStore, ScriptedExecutor, fast_retry};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_build_replays_from_jetstream() {
        let container = NatsContainer::start()
            .await
            .expect("Failed to start NATS container");
        let bus = container
            .event_bus()
            .await
            .expect("Failed to connect to NATS");

        let registry = ExecutorRegistry::new().with_fallback(Arc::new(ScriptedExecutor::new()));
        let dispatcher = Dispatcher::new(
            Arc::new(RetryQueue::new(registry, fast_retry(), 4)),
            Arc::new(MemoryStore::new()),
        );
        let controller = PipelineController::new(dispatcher, Arc::new(bus.clone()));
        let build_id = BuildId::new("bld_nats");

        let outcome = controller
            .run(
                GraphFixture::fan_in(),
                BuildContext::new(build_id.clone(), serde_json::Value::Null),
            )
            .await
            .expect("Build failed to run");
        assert!(outcome.success);

        // Initializing, 3 x (active, completed), Build.
        let events: Vec<_> = bus
            .replay(&build_id)
            .await
            .expect("Failed to replay")
            .take(8)
            .collect()
            .await;
        let events: Vec<_> = events
            .into_iter()
            .map(|e| e.expect("Undecodable event"))
            .collect();

        assert_eq!(events.first().unwrap().step, "Initializing");
        let last = events.last().unwrap();
        assert_eq!(last.step, "Build");
        assert_eq!(last.status, ProgressStatus::Completed);
        assert_eq!(bus.metrics().snapshot().events_published, 8);

        bus.shutdown().await.expect("Failed to shut down");
    }

    #[tokio::test]
    async fn test_live_subscriber_sees_terminal_event() {
        let container = NatsContainer::start()
            .await
            .expect("Failed to start NATS container");
        let bus = container
            .event_bus()
            .await
            .expect("Failed to connect to NATS");
        let build_id = BuildId::new("bld_live");
        let mut stream = bus.subscribe(&build_id).await.expect("Failed to subscribe");

        let registry = ExecutorRegistry::new()
            .with_fallback(Arc::new(ScriptedExecutor::new().fail("a")));
        let dispatcher = Dispatcher::new(
            Arc::new(RetryQueue::new(registry, fast_retry(), 4)),
            Arc::new(MemoryStore::new()),
        );
        PipelineController::new(dispatcher, Arc::new(bus.clone()))
            .run(
                GraphFixture::pair(),
                BuildContext::new(build_id.clone(), serde_json::Value::Null),
            )
            .await
            .expect("Build failed to run");

        let terminal = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(Ok(event)) = stream.next().await {
                if event.node_id.is_none() && event.status.is_terminal() {
                    return Some(event);
                }
            }
            None
        })
        .await
        .expect("Timed out waiting for the terminal event")
        .expect("Stream ended early");

        assert_eq!(terminal.status, ProgressStatus::Error);
        assert!(terminal.details.contains("a (generate-file)"));
    }
}
