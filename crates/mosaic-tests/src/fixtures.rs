//! Work graph fixtures.

use mosaic_core::build::BuildContext;
use mosaic_core::graph::{WorkGraph, WorkGraphNode};
use mosaic_core::ids::BuildId;

/// Factory for common work graph shapes.
pub struct GraphFixture;

impl GraphFixture {
    /// `a` and `b` are independent; `c` needs both.
    pub fn fan_in() -> WorkGraph {
        WorkGraph::new(vec![
            WorkGraphNode::new("a", "generate-file"),
            WorkGraphNode::new("b", "generate-file"),
            WorkGraphNode::new("c", "generate-file").depends_on(["a", "b"]),
        ])
    }

    /// `b` needs `a`.
    pub fn pair() -> WorkGraph {
        WorkGraph::new(vec![
            WorkGraphNode::new("a", "generate-file"),
            WorkGraphNode::new("b", "generate-file").depends_on(["a"]),
        ])
    }

    /// `a` and `b` need each other.
    pub fn two_cycle() -> WorkGraph {
        WorkGraph::new(vec![
            WorkGraphNode::new("a", "generate-file").depends_on(["b"]),
            WorkGraphNode::new("b", "generate-file").depends_on(["a"]),
        ])
    }

    /// `b` needs a node that does not exist.
    pub fn dangling() -> WorkGraph {
        WorkGraph::new(vec![
            WorkGraphNode::new("a", "generate-file"),
            WorkGraphNode::new("b", "generate-file").depends_on(["a", "ghost"]),
        ])
    }

    /// `n0 -> n1 -> ... -> n{len-1}`.
    pub fn chain(len: usize) -> WorkGraph {
        let nodes = (0..len)
            .map(|i| {
                let node = WorkGraphNode::new(format!("n{}", i), "generate-file");
                if i == 0 {
                    node
                } else {
                    node.depends_on([format!("n{}", i - 1)])
                }
            })
            .collect();
        WorkGraph::new(nodes)
    }

    /// `width` independent roots all feeding one sink.
    pub fn wide(width: usize) -> WorkGraph {
        let mut nodes: Vec<WorkGraphNode> = (0..width)
            .map(|i| WorkGraphNode::new(format!("leaf{}", i), "generate-file"))
            .collect();
        let leaves: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        nodes.push(WorkGraphNode::new("sink", "generate-file").depends_on(leaves));
        WorkGraph::new(nodes)
    }

    /// A small web application build: environment, types, data, routes and
    /// pages, the shape the planner typically produces.
    pub fn web_app() -> WorkGraph {
        WorkGraph::new(vec![
            WorkGraphNode::new("start-vm", "start-vm")
                .with_description("Start the development environment"),
            WorkGraphNode::new("lib/types.ts", "generate-types")
                .with_description("Shared entity types"),
            WorkGraphNode::new("lib/data.ts", "generate-mock-data")
                .with_description("Seed data for the users list")
                .depends_on(["lib/types.ts"]),
            WorkGraphNode::new("app/api/users/route.ts", "generate-api-route")
                .with_description("GET and POST /api/users")
                .depends_on(["lib/types.ts", "lib/data.ts", "start-vm"]),
            WorkGraphNode::new("app/users/page.tsx", "generate-page")
                .with_description("Users table")
                .depends_on(["app/api/users/route.ts"]),
        ])
    }
}

/// Build context with a recognizable plan.
pub fn build_context(build_id: &str) -> BuildContext {
    BuildContext::new(
        BuildId::new(build_id),
        serde_json::json!({ "app": "crm", "entities": ["user"] }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_shape() {
        let graph = GraphFixture::chain(3);
        assert_eq!(graph.len(), 3);
        assert!(graph.nodes[0].depends_on.is_empty());
        assert_eq!(graph.nodes[2].depends_on, vec!["n1".to_string()]);
    }

    #[test]
    fn test_wide_sink_depends_on_every_leaf() {
        let graph = GraphFixture::wide(4);
        assert_eq!(graph.node("sink").unwrap().depends_on.len(), 4);
    }
}
