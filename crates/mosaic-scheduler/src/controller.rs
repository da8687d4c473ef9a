//! Pipeline controller.
//!
//! Drives one build from a validated work graph to exactly one terminal
//! [`BuildOutcome`]:
//!
//! ```text
//! Initializing -> Running -> { Succeeded | Failed }
//! ```
//!
//! Dispatches run concurrently as futures polled by the controller itself,
//! so per-node status is only ever written from this single flow. A failed
//! node stops new dispatches but never cancels nodes already in flight.

use crate::dag::{DagBuilder, DagNode, ReadySet, WorkDag};
use crate::dispatcher::Dispatcher;
use crate::queue::RetryPolicy;
use crate::reporter::ProgressReporter;
use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use mosaic_core::build::{BuildContext, BuildOutcome, FailureCause, FailureKind, PipelineState};
use mosaic_core::events::{ProgressEvent, ProgressStatus};
use mosaic_core::graph::{NodeStatus, WorkGraph};
use mosaic_core::ports::EventBus;
use mosaic_core::task::TaskOutput;
use mosaic_core::{Error, Result};
use mosaic_trace::{BuildAttributes, build_span, node_span, wave_span};
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{Instrument, error, info, warn};

/// When a node becomes eligible to start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingPolicy {
    /// Dispatch the whole ready set, wait for all of it, repeat.
    #[default]
    Wave,
    /// Dispatch each node as soon as its last dependency is terminal.
    Greedy,
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchedulingPolicy::Wave => "wave",
            SchedulingPolicy::Greedy => "greedy",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown scheduling policy: {0} (expected `wave` or `greedy`)")]
pub struct UnknownPolicy(String);

impl FromStr for SchedulingPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wave" => Ok(SchedulingPolicy::Wave),
            "greedy" => Ok(SchedulingPolicy::Greedy),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub policy: SchedulingPolicy,
    pub retry: RetryPolicy,
    /// Cap on concurrently running task attempts.
    pub max_concurrent_tasks: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: SchedulingPolicy::Wave,
            retry: RetryPolicy::default(),
            max_concurrent_tasks: 8,
        }
    }
}

/// Step label used in progress events for a node.
fn step_for(node: &DagNode) -> String {
    format!("{}: {}", node.task, node.id)
}

/// Per-build mutable state, owned by the controlling flow.
struct RunState<'a> {
    dag: &'a WorkDag,
    ready: ReadySet,
    statuses: Vec<NodeStatus>,
    state: PipelineState,
    completed: usize,
    rounds: usize,
    failure: Option<FailureCause>,
    side_results: serde_json::Map<String, serde_json::Value>,
}

impl<'a> RunState<'a> {
    fn new(dag: &'a WorkDag) -> Self {
        Self {
            dag,
            ready: dag.ready_set(),
            statuses: vec![NodeStatus::Pending; dag.len()],
            state: PipelineState::Initializing,
            completed: 0,
            rounds: 0,
            failure: None,
            side_results: serde_json::Map::new(),
        }
    }

    fn transition(&mut self, next: PipelineState) {
        info!(from = ?self.state, to = ?next, "Pipeline state changed");
        self.state = next;
    }

    /// Mark a node running. Returns false if it was not pending.
    fn start(&mut self, index: NodeIndex, reporter: &ProgressReporter, context: &BuildContext) -> bool {
        let node = self.dag.node(index);
        if let Err(e) = self.statuses[index.index()].advance(&node.id, NodeStatus::Running) {
            error!(node_id = %node.id, error = %e, "Refusing to dispatch node twice");
            return false;
        }
        reporter.emit(
            ProgressEvent::new(
                context.build_id.clone(),
                step_for(node),
                ProgressStatus::Active,
                node.description.clone(),
            )
            .for_node(&node.id),
        );
        true
    }

    /// Record a node's terminal result and release its dependents.
    fn finish(
        &mut self,
        index: NodeIndex,
        result: Result<TaskOutput>,
        reporter: &ProgressReporter,
        context: &BuildContext,
    ) {
        let node = self.dag.node(index);
        let slot = index.index();

        match result {
            Ok(output) => {
                if let Err(e) = self.statuses[slot].advance(&node.id, NodeStatus::Completed) {
                    error!(node_id = %node.id, error = %e, "Dropping duplicate completion");
                    return;
                }
                self.completed += 1;
                let details = match &output.artifact {
                    Some(artifact) if !artifact.path.is_empty() => {
                        format!("Generated {}", artifact.path)
                    }
                    _ => "Completed".to_string(),
                };
                if let Some(side_result) = output.side_result {
                    self.side_results.insert(node.id.clone(), side_result);
                }
                reporter.emit(
                    ProgressEvent::new(
                        context.build_id.clone(),
                        step_for(node),
                        ProgressStatus::Completed,
                        details,
                    )
                    .for_node(&node.id),
                );
            }
            Err(err) => {
                if let Err(e) = self.statuses[slot].advance(&node.id, NodeStatus::Failed) {
                    error!(node_id = %node.id, error = %e, "Dropping duplicate failure");
                    return;
                }
                error!(node_id = %node.id, task = %node.task, error = %err, "Node failed");
                reporter.emit(
                    ProgressEvent::new(
                        context.build_id.clone(),
                        step_for(node),
                        ProgressStatus::Error,
                        err.to_string(),
                    )
                    .for_node(&node.id),
                );
                if self.failure.is_none() {
                    self.failure = Some(cause_from(&err, node));
                }
            }
        }

        self.ready.complete(index);
    }

    fn aborted(&self) -> bool {
        self.failure.is_some()
    }
}

fn cause_from(err: &Error, node: &DagNode) -> FailureCause {
    let (kind, message) = match err {
        Error::SideEffect { message, .. } => (FailureKind::SideEffect, message.clone()),
        Error::TaskExecution { message, .. } => (FailureKind::TaskExecution, message.clone()),
        other => (FailureKind::TaskExecution, other.to_string()),
    };
    FailureCause {
        kind,
        node_id: Some(node.id.clone()),
        task: Some(node.task.clone()),
        message,
    }
}

/// Runs work graphs to completion.
pub struct PipelineController {
    dispatcher: Arc<Dispatcher>,
    bus: Arc<dyn EventBus>,
    policy: SchedulingPolicy,
}

impl PipelineController {
    pub fn new(dispatcher: Dispatcher, bus: Arc<dyn EventBus>) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            bus,
            policy: SchedulingPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SchedulingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// Execute `graph` for one build.
    ///
    /// Returns `Err` only when the graph fails validation, in which case no
    /// node was dispatched. Every other outcome, including task failures
    /// and integrity failures, is an `Ok(BuildOutcome)`.
    pub async fn run(&self, graph: WorkGraph, context: BuildContext) -> Result<BuildOutcome> {
        let started_at = Utc::now();
        let build_id = context.build_id.clone();
        let reporter = ProgressReporter::spawn(self.bus.clone());

        let dag = match DagBuilder::new().build(&graph) {
            Ok(dag) => dag,
            Err(e) => {
                warn!(build_id = %build_id, error = %e, "Rejecting work graph");
                reporter.report(&build_id, "Build", ProgressStatus::Error, e.to_string());
                reporter.shutdown().await;
                return Err(e.into());
            }
        };
        drop(graph);

        let attrs = BuildAttributes::new()
            .build(build_id.as_str(), dag.len())
            .policy(self.policy.to_string());
        let span = build_span(&attrs);

        let mut run = RunState::new(&dag);
        reporter.report(
            &build_id,
            "Initializing",
            ProgressStatus::Active,
            format!("Executing work graph with {} nodes", dag.len()),
        );
        info!(build_id = %build_id, nodes = dag.len(), policy = %self.policy, "Starting build");

        async {
            run.transition(PipelineState::Running);
            match self.policy {
                SchedulingPolicy::Wave => self.run_waves(&mut run, &context, &reporter).await,
                SchedulingPolicy::Greedy => self.run_greedy(&mut run, &context, &reporter).await,
            }
        }
        .instrument(span)
        .await;

        let outcome = self.conclude(run, &context, &reporter, started_at);
        reporter.shutdown().await;
        Ok(outcome)
    }

    /// Wave-synchronous Kahn: each round waits for every node it started.
    async fn run_waves(&self, run: &mut RunState<'_>, context: &BuildContext, reporter: &ProgressReporter) {
        let dag = run.dag;
        loop {
            let wave = run.ready.take_ready();
            if wave.is_empty() {
                break;
            }
            run.rounds += 1;
            let span = wave_span(context.build_id.as_str(), run.rounds, wave.len());
            info!(build_id = %context.build_id, wave = run.rounds, width = wave.len(), "Starting wave");

            let mut in_flight = FuturesUnordered::new();
            for index in wave {
                if run.start(index, reporter, context) {
                    in_flight.push(self.dispatch(dag, index, context));
                }
            }
            while let Some((index, result)) = in_flight.next().instrument(span.clone()).await {
                run.finish(index, result, reporter, context);
            }

            if run.aborted() {
                break;
            }
        }
    }

    /// Start every node the moment its dependency count reaches zero.
    async fn run_greedy(&self, run: &mut RunState<'_>, context: &BuildContext, reporter: &ProgressReporter) {
        let dag = run.dag;
        let mut in_flight = FuturesUnordered::new();

        loop {
            if !run.aborted() {
                let batch = run.ready.take_ready();
                if !batch.is_empty() {
                    run.rounds += 1;
                    for index in batch {
                        if run.start(index, reporter, context) {
                            in_flight.push(self.dispatch(dag, index, context));
                        }
                    }
                }
            }

            match in_flight.next().await {
                Some((index, result)) => run.finish(index, result, reporter, context),
                None => break,
            }
        }
    }

    fn dispatch<'a>(
        &'a self,
        dag: &'a WorkDag,
        index: NodeIndex,
        context: &'a BuildContext,
    ) -> impl Future<Output = (NodeIndex, Result<TaskOutput>)> + 'a {
        let node = dag.node(index);
        let attrs = BuildAttributes::new()
            .build(context.build_id.as_str(), dag.len())
            .node(&node.id, &node.task);

        async move {
            let result = AssertUnwindSafe(self.dispatcher.dispatch(node, context))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(Error::TaskExecution {
                        node_id: node.id.clone(),
                        task: node.task.clone(),
                        message: "executor panicked".to_string(),
                    })
                });
            (index, result)
        }
        .instrument(node_span(&attrs))
    }

    fn conclude(
        &self,
        mut run: RunState<'_>,
        context: &BuildContext,
        reporter: &ProgressReporter,
        started_at: chrono::DateTime<Utc>,
    ) -> BuildOutcome {
        let total = run.dag.len();
        let completed = run.completed;

        let cause = match run.failure.take() {
            Some(cause) => Some(cause),
            None if completed != total => {
                let err = Error::Integrity { completed, total };
                error!(build_id = %context.build_id, completed, total, "{}", err);
                Some(FailureCause {
                    kind: FailureKind::Integrity,
                    node_id: None,
                    task: None,
                    message: err.to_string(),
                })
            }
            None => None,
        };

        let side_result = if run.side_results.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(std::mem::take(&mut run.side_results)))
        };

        let terminal = match &cause {
            None => {
                run.transition(PipelineState::Succeeded);
                ProgressEvent::new(
                    context.build_id.clone(),
                    "Build",
                    ProgressStatus::Completed,
                    format!("Build completed: {} of {} nodes", completed, total),
                )
                .with_side_result(side_result.clone())
            }
            Some(cause) => {
                run.transition(PipelineState::Failed);
                ProgressEvent::new(
                    context.build_id.clone(),
                    "Build",
                    ProgressStatus::Error,
                    cause.to_string(),
                )
            }
        };
        reporter.emit(terminal);

        let statuses: BTreeMap<String, NodeStatus> = run
            .dag
            .nodes()
            .map(|(index, node)| (node.id.clone(), run.statuses[index.index()]))
            .collect();

        let outcome = BuildOutcome {
            build_id: context.build_id.clone(),
            success: cause.is_none(),
            state: run.state,
            cause,
            side_result,
            completed,
            total,
            rounds: run.rounds,
            statuses,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            build_id = %outcome.build_id,
            success = outcome.success,
            completed,
            total,
            rounds = outcome.rounds,
            duration_ms = outcome.duration_ms(),
            "Build finished"
        );
        outcome
    }
}
