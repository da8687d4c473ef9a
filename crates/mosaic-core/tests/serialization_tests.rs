//! Wire-format tests for mosaic-core types.

use mosaic_core::build::BuildContext;
use mosaic_core::events::{ProgressEvent, ProgressStatus};
use mosaic_core::graph::{NodeStatus, WorkGraph};
use mosaic_core::ids::BuildId;
use mosaic_core::task::TaskRequest;
use pretty_assertions::assert_eq;

const PLANNER_OUTPUT: &str = r#"{
  "status": "WORK_GRAPH_GENERATED",
  "workGraph": {
    "nodes": [
      { "id": "start-vm", "task": "start-vm", "description": "Start the development VM.", "dependsOn": [] },
      { "id": "lib/types.ts", "task": "generate-types", "description": "Generate TypeScript types.", "dependsOn": [] },
      { "id": "lib/data.ts", "task": "generate-data-layer", "description": "Generate the data access layer.", "dependsOn": ["lib/types.ts"] },
      { "id": "generate:app/api/users/route.ts", "task": "generate-api-route", "description": "Generate API route for users", "dependsOn": ["start-vm", "lib/data.ts"] },
      { "id": "review:app/api/users/route.ts", "task": "review-code", "description": "Review architecture", "dependsOn": ["generate:app/api/users/route.ts"] },
      { "id": "run-tests", "task": "run-tests", "description": "Run integration and smoke tests.", "dependsOn": ["review:app/api/users/route.ts"] }
    ]
  }
}"#;

#[test]
fn test_planner_envelope_is_unwrapped() {
    let graph = WorkGraph::from_json(PLANNER_OUTPUT).expect("parse");

    assert_eq!(graph.len(), 6);
    let route = graph.node("generate:app/api/users/route.ts").expect("route node");
    assert_eq!(route.task, "generate-api-route");
    assert_eq!(route.depends_on, vec!["start-vm", "lib/data.ts"]);
    assert!(graph.nodes.iter().all(|n| n.status == NodeStatus::Pending));
}

#[test]
fn test_work_graph_roundtrip_keeps_camel_case() {
    let graph = WorkGraph::from_json(PLANNER_OUTPUT).expect("parse");
    let json = graph.to_json_pretty().expect("serialize");

    assert!(json.contains("\"dependsOn\""));
    let reparsed = WorkGraph::from_json(&json).expect("reparse");
    assert_eq!(graph, reparsed);
}

#[test]
fn test_task_request_carries_context_unchanged() {
    let plan = serde_json::json!({ "backendApis": { "apis": [{ "id": "users" }] } });
    let request = TaskRequest {
        build_id: BuildId::new("session-1"),
        node_id: "lib/types.ts".to_string(),
        task: "generate-types".to_string(),
        description: "Generate TypeScript types.".to_string(),
        context: BuildContext::new(BuildId::new("session-1"), plan.clone()),
    };

    let json = serde_json::to_value(&request).expect("serialize");
    assert_eq!(json["nodeId"], "lib/types.ts");
    assert_eq!(json["context"]["plan"], plan);
}

#[test]
fn test_progress_event_roundtrip() {
    let event = ProgressEvent::new(
        BuildId::new("session-1"),
        "generate-types: lib/types.ts",
        ProgressStatus::Error,
        "executor unreachable",
    )
    .for_node("lib/types.ts");

    let json = serde_json::to_string(&event).expect("serialize");
    let parsed: ProgressEvent = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(event, parsed);
}
