//! CLI configuration management.

use anyhow::{Context, Result, anyhow};
use mosaic_scheduler::EngineConfig;
use mosaic_trace::TracingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// CLI configuration, read from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: EngineConfig,
    pub artifacts: ArtifactsConfig,
    pub devflow: DevFlowConfig,
    /// Agent endpoint per task kind.
    pub executors: BTreeMap<String, String>,
    /// Endpoint for task kinds with no entry in `executors`.
    pub default_executor: Option<String>,
    pub nats: NatsSection,
    pub tracing: TracingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub root_dir: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("generated"),
        }
    }
}

/// The dev-flow manager hosting live environments. Without a URL, artifacts
/// are only persisted locally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevFlowConfig {
    pub url: Option<String>,
}

/// Progress relay. Without a URL, events stay in process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsSection {
    pub url: Option<String>,
}

impl CliConfig {
    /// Load from `path`, or from the default location when none is given.
    /// A missing default file yields the default configuration; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let path = Self::config_path()?;
                if path.exists() {
                    Self::read(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Get the default configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "mosaic", "mosaic")
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.yaml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_scheduler::SchedulingPolicy;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = CliConfig::from_yaml("{}").unwrap();
        assert_eq!(config.engine.policy, SchedulingPolicy::Wave);
        assert_eq!(config.engine.max_concurrent_tasks, 8);
        assert_eq!(config.artifacts.root_dir, PathBuf::from("generated"));
        assert!(config.devflow.url.is_none());
        assert!(config.executors.is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let config = CliConfig::from_yaml(
            r#"
engine:
  policy: greedy
  retry:
    max_attempts: 3
executors:
  generate-file: http://agents.local/generate
devflow:
  url: http://localhost:8000
"#,
        )
        .unwrap();

        assert_eq!(config.engine.policy, SchedulingPolicy::Greedy);
        assert_eq!(config.engine.retry.max_attempts, 3);
        assert_eq!(config.engine.retry.base_delay_ms, 1000);
        assert_eq!(
            config.executors.get("generate-file").map(String::as_str),
            Some("http://agents.local/generate")
        );
        assert_eq!(config.devflow.url.as_deref(), Some("http://localhost:8000"));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CliConfig::load(Some(&dir.path().join("absent.yaml"))).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaic.yaml");
        std::fs::write(&path, "artifacts:\n  root_dir: /tmp/out\n").unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.artifacts.root_dir, PathBuf::from("/tmp/out"));
    }
}
