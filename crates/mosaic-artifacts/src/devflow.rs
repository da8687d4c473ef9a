//! Client for the dev-flow manager, which hosts each build's live
//! development environment.

use async_trait::async_trait;
use mosaic_core::ids::BuildId;
use mosaic_core::ports::ArtifactDelivery;
use mosaic_core::{Error, Result};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// A started development environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub session_id: String,
    pub preview_url: String,
    pub logs_ws_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadReceipt {
    pub session_id: String,
    pub file_path: String,
    pub status: String,
}

#[derive(Serialize)]
struct StartEnvironmentRequest<'a> {
    session_id: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// HTTP client for the dev-flow manager.
///
/// The build id doubles as the environment's session id.
#[derive(Debug, Clone)]
pub struct DevFlowClient {
    base_url: Url,
    http: reqwest::Client,
}

impl DevFlowClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(300))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| Error::Network(format!("Invalid dev-flow URL {}: {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Network(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// Start (or restart) the environment for a session.
    pub async fn start_environment(&self, session_id: &str) -> Result<Environment> {
        let url = self.endpoint("start-environment")?;
        info!(session_id = %session_id, "Starting development environment");

        let response = self
            .http
            .post(url)
            .json(&StartEnvironmentRequest { session_id })
            .send()
            .await
            .map_err(|e| Error::Network(format!("start-environment request failed: {}", e)))?;

        let response = check_status("start-environment", response).await?;
        response
            .json::<Environment>()
            .await
            .map_err(|e| Error::Serialization(format!("Invalid start-environment response: {}", e)))
    }

    /// Upload one file into the session's source tree.
    pub async fn upload_file(
        &self,
        session_id: &str,
        relative_path: &str,
        content: &str,
    ) -> Result<UploadReceipt> {
        let url = self.endpoint("upload-file")?;
        let file_name = relative_path
            .rsplit('/')
            .next()
            .unwrap_or(relative_path)
            .to_string();

        let form = Form::new()
            .text("session_id", session_id.to_string())
            .text("relative_path", relative_path.to_string())
            .part(
                "file",
                Part::bytes(content.as_bytes().to_vec()).file_name(file_name),
            );

        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Network(format!("upload-file request failed: {}", e)))?;

        let response = check_status("upload-file", response).await?;
        response
            .json::<UploadReceipt>()
            .await
            .map_err(|e| Error::Serialization(format!("Invalid upload-file response: {}", e)))
    }
}

/// Turn a non-2xx response into an error carrying the server's `detail`.
async fn check_status(operation: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body,
    };
    Err(Error::Network(format!("{} returned {}: {}", operation, status, detail)))
}

#[async_trait]
impl ArtifactDelivery for DevFlowClient {
    async fn deliver(&self, build_id: &BuildId, relative_path: &str, content: &str) -> Result<()> {
        let receipt = self.upload_file(build_id.as_str(), relative_path, content).await?;
        debug!(
            session_id = %receipt.session_id,
            path = %receipt.file_path,
            status = %receipt.status,
            "Artifact delivered to environment"
        );
        Ok(())
    }
}
