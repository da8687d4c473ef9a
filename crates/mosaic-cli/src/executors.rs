//! Task executors wired up by the CLI.

use async_trait::async_trait;
use mosaic_artifacts::DevFlowClient;
use mosaic_core::task::{TaskError, TaskOutput, TaskRequest, artifact_path_for};
use mosaic_scheduler::TaskExecutor;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Task kind that provisions the build's development environment.
pub const ENVIRONMENT_TASK: &str = "start-vm";

/// What a remote agent answers with.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentResponse {
    content: Option<String>,
    path: Option<String>,
    side_result: Option<serde_json::Value>,
    error: Option<String>,
}

/// Forwards a task to a remote agent over HTTP.
///
/// The request body is the [`TaskRequest`] itself. Per-attempt timeouts are
/// left to the queue.
#[derive(Debug, Clone)]
pub struct HttpTaskExecutor {
    endpoint: Url,
    http: reqwest::Client,
}

impl HttpTaskExecutor {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { endpoint, http })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TaskExecutor for HttpTaskExecutor {
    async fn execute(&self, request: &TaskRequest) -> Result<TaskOutput, TaskError> {
        debug!(endpoint = %self.endpoint, node_id = %request.node_id, "Calling agent");

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| TaskError::Failed(format!("agent request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TaskError::Failed(format!("failed to read agent response: {}", e)))?;

        let parsed = serde_json::from_str::<AgentResponse>(&body);
        if !status.is_success() {
            let message = match parsed {
                Ok(AgentResponse {
                    error: Some(error), ..
                }) => error,
                _ => body,
            };
            return Err(TaskError::Failed(format!("agent returned {}: {}", status, message)));
        }

        let parsed = parsed
            .map_err(|e| TaskError::Failed(format!("invalid agent response: {}", e)))?;
        if let Some(error) = parsed.error {
            return Err(TaskError::Failed(error));
        }

        let mut output = match parsed.content {
            Some(content) => TaskOutput::with_artifact(parsed.path.unwrap_or_default(), content),
            None => TaskOutput::empty(),
        };
        output.side_result = parsed.side_result;
        Ok(output)
    }
}

/// Starts the build's development environment; its preview URL becomes the
/// node's side result.
#[derive(Debug, Clone)]
pub struct EnvironmentExecutor {
    client: DevFlowClient,
}

impl EnvironmentExecutor {
    pub fn new(client: DevFlowClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskExecutor for EnvironmentExecutor {
    async fn execute(&self, request: &TaskRequest) -> Result<TaskOutput, TaskError> {
        let environment = self
            .client
            .start_environment(request.build_id.as_str())
            .await
            .map_err(|e| TaskError::Failed(e.to_string()))?;
        Ok(TaskOutput::with_side_result(serde_json::Value::String(
            environment.preview_url,
        )))
    }
}

/// Stands in for every agent during a dry run.
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecutor {
    delay: Duration,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, request: &TaskRequest) -> Result<TaskOutput, TaskError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if request.task == ENVIRONMENT_TASK {
            return Ok(TaskOutput::with_side_result(serde_json::Value::String(
                format!("simulated://{}", request.build_id),
            )));
        }

        let content = format!(
            "// Placeholder generated by task `{}` for {}\n// {}\n",
            request.task,
            artifact_path_for(&request.node_id),
            request.description
        );
        Ok(TaskOutput::with_artifact("", content))
    }
}
