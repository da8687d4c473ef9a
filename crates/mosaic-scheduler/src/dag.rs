//! Work graph validation and the ready-set index.

use mosaic_core::GraphError;
use mosaic_core::graph::WorkGraph;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// A validated node of the work graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    pub id: String,
    pub task: String,
    pub description: String,
    /// Dependencies with duplicates collapsed, in declaration order.
    pub depends_on: Vec<String>,
}

/// Directed acyclic graph of a build's tasks.
///
/// Edges point from a dependency to its dependent. Node indices are dense
/// and follow declaration order, so they double as arena slots for
/// per-node state.
#[derive(Debug)]
pub struct WorkDag {
    graph: DiGraph<DagNode, ()>,
    id_to_index: HashMap<String, NodeIndex>,
}

impl WorkDag {
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node(&self, index: NodeIndex) -> &DagNode {
        &self.graph[index]
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.id_to_index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&DagNode> {
        self.index_of(id).map(|idx| &self.graph[idx])
    }

    /// All nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &DagNode)> {
        self.graph
            .node_indices()
            .map(move |idx| (idx, &self.graph[idx]))
    }

    /// Nodes with no dependencies.
    pub fn roots(&self) -> Vec<&DagNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Nodes that depend directly on `id`.
    pub fn dependents(&self, id: &str) -> Vec<&DagNode> {
        self.index_of(id)
            .map(|idx| {
                let mut deps: Vec<NodeIndex> = self
                    .graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .collect();
                deps.sort();
                deps.into_iter().map(|n| &self.graph[n]).collect()
            })
            .unwrap_or_default()
    }

    /// A fresh scheduling index over this graph.
    pub fn ready_set(&self) -> ReadySet {
        ReadySet::new(&self.graph)
    }

    /// The rounds the wave policy would dispatch, assuming every node
    /// completes.
    pub fn waves(&self) -> Vec<Vec<&DagNode>> {
        let mut ready = self.ready_set();
        let mut waves = Vec::new();
        loop {
            let wave = ready.take_ready();
            if wave.is_empty() {
                break;
            }
            for &idx in &wave {
                ready.complete(idx);
            }
            waves.push(wave.into_iter().map(|idx| &self.graph[idx]).collect());
        }
        waves
    }
}

/// In-degree bookkeeping for Kahn's algorithm.
///
/// `take_ready` hands out every node whose dependencies are all terminal;
/// `complete` marks a node terminal (whether it succeeded or failed) and
/// releases the dependents that reach zero.
#[derive(Debug, Clone)]
pub struct ReadySet {
    in_degree: Vec<usize>,
    adjacency: Vec<Vec<NodeIndex>>,
    ready: Vec<NodeIndex>,
    terminal: Vec<bool>,
    remaining: usize,
}

impl ReadySet {
    fn new(graph: &DiGraph<DagNode, ()>) -> Self {
        let count = graph.node_count();
        let mut in_degree = vec![0; count];
        let mut adjacency = vec![Vec::new(); count];

        for edge in graph.raw_edges() {
            in_degree[edge.target().index()] += 1;
            adjacency[edge.source().index()].push(edge.target());
        }
        for dependents in &mut adjacency {
            dependents.sort();
        }

        let ready = graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();

        Self {
            in_degree,
            adjacency,
            ready,
            terminal: vec![false; count],
            remaining: count,
        }
    }

    /// Drain the current ready set.
    pub fn take_ready(&mut self) -> Vec<NodeIndex> {
        std::mem::take(&mut self.ready)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Mark `index` terminal. Returns the dependents that became ready.
    pub fn complete(&mut self, index: NodeIndex) -> Vec<NodeIndex> {
        let slot = index.index();
        if self.terminal[slot] {
            return Vec::new();
        }
        self.terminal[slot] = true;
        self.remaining -= 1;

        let mut released = Vec::new();
        for &dependent in &self.adjacency[slot] {
            let degree = &mut self.in_degree[dependent.index()];
            *degree -= 1;
            if *degree == 0 {
                released.push(dependent);
            }
        }
        self.ready.extend_from_slice(&released);
        released
    }

    /// Nodes not yet terminal.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    fn blocked(&self) -> impl Iterator<Item = usize> + '_ {
        self.in_degree
            .iter()
            .enumerate()
            .filter(|&(slot, &degree)| degree > 0 && !self.terminal[slot])
            .map(|(slot, _)| slot)
    }
}

/// Builder for constructing validated work DAGs.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Validate `work_graph` and index it for scheduling.
    pub fn build(&self, work_graph: &WorkGraph) -> Result<WorkDag, GraphError> {
        if work_graph.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        let mut graph = DiGraph::with_capacity(work_graph.len(), 0);
        let mut id_to_index = HashMap::with_capacity(work_graph.len());

        for node in &work_graph.nodes {
            if id_to_index.contains_key(&node.id) {
                return Err(GraphError::DuplicateId(node.id.clone()));
            }
            let mut seen = HashSet::new();
            let depends_on = node
                .depends_on
                .iter()
                .filter(|dep| seen.insert(dep.as_str()))
                .cloned()
                .collect();
            let idx = graph.add_node(DagNode {
                id: node.id.clone(),
                task: node.task.clone(),
                description: node.description.clone(),
                depends_on,
            });
            id_to_index.insert(node.id.clone(), idx);
        }

        for idx in graph.node_indices().collect::<Vec<_>>() {
            let deps = graph[idx].depends_on.clone();
            for dep in deps {
                let dep_idx =
                    id_to_index
                        .get(&dep)
                        .ok_or_else(|| GraphError::UnknownDependency {
                            node: graph[idx].id.clone(),
                            dependency: dep.clone(),
                        })?;
                graph.add_edge(*dep_idx, idx, ());
            }
        }

        let dag = WorkDag { graph, id_to_index };
        verify_acyclic(&dag)?;
        Ok(dag)
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a work graph without keeping the index.
pub fn validate(work_graph: &WorkGraph) -> Result<(), GraphError> {
    DagBuilder::new().build(work_graph).map(|_| ())
}

/// Run the scheduling in-degree pass to exhaustion. Anything left blocked
/// sits on or behind a cycle.
fn verify_acyclic(dag: &WorkDag) -> Result<(), GraphError> {
    let mut ready = dag.ready_set();
    while ready.has_ready() {
        for idx in ready.take_ready() {
            ready.complete(idx);
        }
    }
    if ready.is_exhausted() {
        return Ok(());
    }

    let nodes = find_cycle(&dag.graph).unwrap_or_else(|| {
        ready
            .blocked()
            .map(|slot| dag.graph[NodeIndex::new(slot)].id.clone())
            .collect()
    });
    Err(GraphError::Cycle { nodes })
}

/// A concrete cycle path, first node repeated at the end.
fn find_cycle(graph: &DiGraph<DagNode, ()>) -> Option<Vec<String>> {
    let mut components = tarjan_scc(graph);
    for component in &mut components {
        component.sort();
    }
    components.sort();

    for component in components {
        let start = component[0];
        if component.len() == 1 && !graph.contains_edge(start, start) {
            continue;
        }
        let members: HashSet<NodeIndex> = component.iter().copied().collect();
        let mut path = vec![start];
        let mut current = start;
        while let Some(next) = graph
            .neighbors_directed(current, Direction::Outgoing)
            .filter(|n| members.contains(n))
            .min()
        {
            if let Some(pos) = path.iter().position(|&n| n == next) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|&n| graph[n].id.clone()).collect();
                cycle.push(graph[next].id.clone());
                return Some(cycle);
            }
            path.push(next);
            current = next;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::graph::WorkGraphNode;

    fn graph(nodes: &[(&str, &[&str])]) -> WorkGraph {
        WorkGraph::new(
            nodes
                .iter()
                .map(|(id, deps)| WorkGraphNode::new(*id, "generate-file").depends_on(deps.iter().copied()))
                .collect(),
        )
    }

    fn ids(nodes: &[&DagNode]) -> Vec<String> {
        let mut ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_diamond_waves() {
        let dag = DagBuilder::new()
            .build(&graph(&[
                ("types", &[]),
                ("data", &["types"]),
                ("api", &["data"]),
                ("page", &["data"]),
                ("tests", &["api", "page"]),
            ]))
            .unwrap();

        let waves = dag.waves();
        assert_eq!(waves.len(), 4);
        assert_eq!(ids(&waves[0]), vec!["types"]);
        assert_eq!(ids(&waves[2]), vec!["api", "page"]);
        assert_eq!(ids(&dag.dependents("data")), vec!["api", "page"]);
        assert_eq!(dag.roots().len(), 1);
    }

    #[test]
    fn test_independent_roots_share_first_wave() {
        let dag = DagBuilder::new()
            .build(&graph(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]))
            .unwrap();

        let waves = dag.waves();
        assert_eq!(ids(&waves[0]), vec!["a", "b"]);
        assert_eq!(ids(&waves[1]), vec!["c"]);
    }

    #[test]
    fn test_empty_graph_rejected() {
        assert_eq!(validate(&WorkGraph::default()), Err(GraphError::EmptyGraph));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = validate(&graph(&[("a", &[]), ("a", &[])])).unwrap_err();
        assert_eq!(err, GraphError::DuplicateId("a".into()));
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let err = validate(&graph(&[("a", &["ghost"])])).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                node: "a".into(),
                dependency: "ghost".into()
            }
        );
    }

    #[test]
    fn test_two_node_cycle_rejected() {
        let err = validate(&graph(&[("a", &["b"]), ("b", &["a"])])).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                nodes: vec!["a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = validate(&graph(&[("root", &[]), ("a", &["a"])])).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                nodes: vec!["a".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_cycle_behind_valid_prefix() {
        let err = validate(&graph(&[
            ("root", &[]),
            ("x", &["root", "z"]),
            ("y", &["x"]),
            ("z", &["y"]),
            ("after", &["z"]),
        ]))
        .unwrap_err();
        match err {
            GraphError::Cycle { nodes } => {
                assert_eq!(nodes.first(), nodes.last());
                assert!(!nodes.contains(&"after".to_string()));
                assert_eq!(nodes.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_dependencies_collapsed() {
        let dag = DagBuilder::new()
            .build(&graph(&[("a", &[]), ("b", &["a", "a"])]))
            .unwrap();

        assert_eq!(dag.get("b").unwrap().depends_on, vec!["a"]);
        let mut ready = dag.ready_set();
        let a = ready.take_ready();
        assert_eq!(a.len(), 1);
        assert_eq!(ready.complete(a[0]).len(), 1);
        assert_eq!(ready.remaining(), 1);
    }

    #[test]
    fn test_complete_is_idempotent() {
        let dag = DagBuilder::new()
            .build(&graph(&[("a", &[]), ("b", &["a"])]))
            .unwrap();
        let mut ready = dag.ready_set();
        let a = ready.take_ready()[0];

        assert_eq!(ready.complete(a).len(), 1);
        assert!(ready.complete(a).is_empty());
        assert_eq!(ready.remaining(), 1);
        assert!(!ready.is_exhausted());
    }
}
