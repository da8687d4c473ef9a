//! Command handlers.

use crate::config::CliConfig;
use crate::executors::{ENVIRONMENT_TASK, EnvironmentExecutor, HttpTaskExecutor, SimulatedExecutor};
use anyhow::{Context, Result, anyhow, bail};
use console::style;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use mosaic_artifacts::{DevFlowClient, FilesystemStore};
use mosaic_core::build::{BuildContext, BuildOutcome};
use mosaic_core::events::ProgressStatus;
use mosaic_core::graph::WorkGraph;
use mosaic_core::ids::BuildId;
use mosaic_core::ports::{EventBus, EventStream};
use mosaic_nats::NatsEventBus;
use mosaic_scheduler::{
    BroadcastEventBus, DagBuilder, Dispatcher, ExecutorRegistry, PipelineController,
    SchedulingPolicy,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Read a work graph, choosing the parser by file extension.
pub fn load_graph(path: &Path) -> Result<WorkGraph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let graph = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid work graph {}", path.display()))?,
        _ => WorkGraph::from_json(&content)
            .with_context(|| format!("Invalid work graph {}", path.display()))?,
    };
    Ok(graph)
}

/// Validate a work graph.
pub fn validate(path: &Path) -> Result<()> {
    let graph = load_graph(path)?;
    let dag = DagBuilder::new().build(&graph)?;

    println!(
        "{} Work graph {} is valid",
        style("✓").green(),
        style(path.display()).bold()
    );
    println!("  Nodes: {}", dag.len());
    let roots: Vec<&str> = dag.roots().iter().map(|n| n.id.as_str()).collect();
    println!("  Roots: {}", roots.join(", "));
    Ok(())
}

/// Print the waves a wave-scheduled run would execute.
pub fn plan(path: &Path) -> Result<()> {
    let graph = load_graph(path)?;
    let dag = DagBuilder::new().build(&graph)?;
    let waves = dag.waves();

    println!(
        "{} {} nodes in {} waves",
        style("▶").cyan(),
        dag.len(),
        waves.len()
    );
    for (i, wave) in waves.iter().enumerate() {
        println!("\n{} {}", style("Wave").bold(), i + 1);
        for node in wave {
            println!("  - {} {}", node.id, style(format!("({})", node.task)).dim());
        }
    }
    Ok(())
}

/// Print the JSON Schema of the work graph document.
pub fn schema() -> Result<()> {
    let schema = schemars::schema_for!(WorkGraph);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

pub struct RunOptions {
    pub graph: PathBuf,
    pub build_id: Option<String>,
    pub plan: Option<PathBuf>,
    pub dry_run: bool,
    pub policy: Option<SchedulingPolicy>,
}

/// Execute a work graph locally.
pub async fn run(config: &CliConfig, options: RunOptions) -> Result<()> {
    let mut graph = load_graph(&options.graph)?;
    let total = graph.len();
    let delivers = !options.dry_run && config.devflow.url.is_some();
    if delivers {
        gate_on_environment(&mut graph);
    }

    let build_id = match options.build_id {
        Some(id) => id.parse::<BuildId>().map_err(|e| anyhow!(e))?,
        None => BuildId::generate(),
    };
    let plan = match &options.plan {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid build plan {}", path.display()))?
        }
        None => serde_json::json!({}),
    };
    let policy = options.policy.unwrap_or(config.engine.policy);

    let nats = match &config.nats.url {
        Some(url) => Some(NatsEventBus::connect(url).await?),
        None => None,
    };
    let bus: Arc<dyn EventBus> = match &nats {
        Some(nats) => Arc::new(nats.clone()),
        None => Arc::new(BroadcastEventBus::default()),
    };

    let registry = build_registry(config, options.dry_run)?;
    let queue = config.engine.queue(registry);
    let store = FilesystemStore::new(&config.artifacts.root_dir);
    let mut dispatcher = Dispatcher::new(Arc::new(queue), Arc::new(store.clone()));
    if delivers && let Some(url) = &config.devflow.url {
        dispatcher = dispatcher.with_delivery(Arc::new(DevFlowClient::new(url)?));
    }
    let controller = PipelineController::new(dispatcher, bus.clone()).with_policy(policy);

    println!(
        "{} Running build {} ({} nodes, {} scheduling{})",
        style("▶").cyan(),
        style(&build_id).bold(),
        total,
        policy,
        if options.dry_run { ", dry run" } else { "" }
    );

    let bar = progress_bar(total as u64)?;
    let watcher = watch(bus.subscribe(&build_id).await?, bar.clone());

    let result = controller
        .run(graph, BuildContext::new(build_id.clone(), plan))
        .await;
    if tokio::time::timeout(Duration::from_secs(5), watcher).await.is_err() {
        warn!(build_id = %build_id, "Progress display did not see the end of the build");
    }
    bar.finish_and_clear();

    if let Some(nats) = &nats {
        nats.shutdown().await?;
    }

    let outcome = result?;
    report_outcome(&outcome, &store)
}

/// Make every node wait for the environment nodes, so nothing is uploaded to
/// a session before the dev-flow manager has created it. Ancestors of an
/// environment node are left alone; an edge there would close a cycle.
fn gate_on_environment(graph: &mut WorkGraph) {
    let environments: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| n.task == ENVIRONMENT_TASK)
        .map(|n| n.id.clone())
        .collect();
    if environments.is_empty() {
        return;
    }

    let deps: HashMap<&str, &[String]> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.depends_on.as_slice()))
        .collect();
    let mut ancestors: HashSet<String> = HashSet::new();
    let mut stack: Vec<&str> = environments.iter().map(String::as_str).collect();
    while let Some(id) = stack.pop() {
        for dep in deps.get(id).copied().unwrap_or_default() {
            if ancestors.insert(dep.clone()) {
                stack.push(dep);
            }
        }
    }

    for node in &mut graph.nodes {
        if node.task == ENVIRONMENT_TASK {
            continue;
        }
        if ancestors.contains(&node.id) {
            warn!(
                node_id = %node.id,
                "Node runs before the environment exists; its upload may be rejected"
            );
            continue;
        }
        for env in &environments {
            if !node.depends_on.contains(env) {
                node.depends_on.push(env.clone());
            }
        }
    }
}

fn build_registry(config: &CliConfig, dry_run: bool) -> Result<ExecutorRegistry> {
    if dry_run {
        return Ok(ExecutorRegistry::new().with_fallback(Arc::new(SimulatedExecutor::new())));
    }

    let mut registry = ExecutorRegistry::new();
    if let Some(url) = &config.devflow.url {
        registry.register(
            ENVIRONMENT_TASK,
            Arc::new(EnvironmentExecutor::new(DevFlowClient::new(url)?)),
        );
    }
    for (kind, endpoint) in &config.executors {
        let executor = HttpTaskExecutor::new(endpoint)
            .with_context(|| format!("Invalid endpoint for task kind {}", kind))?;
        registry.register(kind.clone(), Arc::new(executor));
    }
    if let Some(endpoint) = &config.default_executor {
        let executor = HttpTaskExecutor::new(endpoint)
            .with_context(|| format!("Invalid default executor endpoint {}", endpoint))?;
        registry = registry.with_fallback(Arc::new(executor));
    }

    if registry.kinds().is_empty() && !registry.has_fallback() {
        bail!("No task executors configured; add `executors` to the config or use --dry-run");
    }
    Ok(registry)
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {wide_msg}",
        )?
        .progress_chars("##-"),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    Ok(bar)
}

/// Mirror the build's progress events onto the bar until the build ends.
fn watch(mut events: EventStream, bar: ProgressBar) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable progress event");
                    continue;
                }
            };

            match (event.node_id.is_some(), event.status) {
                (true, ProgressStatus::Active) => bar.set_message(event.step),
                (true, ProgressStatus::Completed) => {
                    bar.inc(1);
                    bar.println(format!("{} {}", style("✓").green(), event.step));
                }
                (true, ProgressStatus::Error) => {
                    bar.println(format!(
                        "{} {}: {}",
                        style("✗").red(),
                        event.step,
                        event.details
                    ));
                }
                (false, status) if status.is_terminal() => break,
                (false, _) => bar.set_message(event.details),
            }
        }
    })
}

fn report_outcome(outcome: &BuildOutcome, store: &FilesystemStore) -> Result<()> {
    if outcome.success {
        println!(
            "{} Build {} succeeded: {}/{} nodes in {} rounds ({} ms)",
            style("✓").green(),
            style(&outcome.build_id).bold(),
            outcome.completed,
            outcome.total,
            outcome.rounds,
            outcome.duration_ms()
        );
        if let Ok(dir) = store.build_dir(&outcome.build_id) {
            println!("  Artifacts: {}", dir.display());
        }
        if let Some(serde_json::Value::Object(side_results)) = &outcome.side_result {
            for (node_id, value) in side_results {
                match value {
                    serde_json::Value::String(s) => println!("  {}: {}", node_id, s),
                    other => println!("  {}: {}", node_id, other),
                }
            }
        }
        return Ok(());
    }

    println!(
        "{} Build {} failed after {}/{} nodes",
        style("✗").red(),
        style(&outcome.build_id).bold(),
        outcome.completed,
        outcome.total
    );
    if let Some(cause) = &outcome.cause {
        println!("  Cause: {}", cause);
    }
    let failed: Vec<&str> = outcome
        .statuses
        .iter()
        .filter(|(_, status)| **status == mosaic_core::graph::NodeStatus::Failed)
        .map(|(id, _)| id.as_str())
        .collect();
    if !failed.is_empty() {
        println!("  Failed nodes: {}", failed.join(", "));
    }
    bail!("build {} failed", outcome.build_id)
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> Result<()> {
    println!("Current configuration:");
    print!("{}", config.to_yaml()?);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }
    Ok(())
}

pub fn show_config_path() -> Result<()> {
    println!("{}", CliConfig::config_path()?.display());
    Ok(())
}
