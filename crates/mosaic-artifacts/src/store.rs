//! Filesystem artifact store.

use crate::path::normalize_relative;
use async_trait::async_trait;
use mosaic_core::ids::BuildId;
use mosaic_core::ports::ArtifactStore;
use mosaic_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Persists artifacts at `<root>/<build id>/<relative path>`.
///
/// Writes go to a temporary sibling and are renamed into place, so a reader
/// never sees a partially written file. Content identical to what is already
/// stored is not rewritten.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Directory holding one build's artifacts.
    pub fn build_dir(&self, build_id: &BuildId) -> Result<PathBuf> {
        let name = build_id.as_str().replace(['/', '\\'], "_");
        if name.is_empty() || name == "." || name == ".." {
            return Err(Error::Artifact(format!(
                "build id is not usable as a directory name: {:?}",
                build_id.as_str()
            )));
        }
        Ok(self.root_dir.join(name))
    }

    pub fn path_for(&self, build_id: &BuildId, relative_path: &str) -> Result<PathBuf> {
        Ok(self.build_dir(build_id)?.join(normalize_relative(relative_path)?))
    }

    /// Read back a stored artifact, if present.
    pub async fn read(&self, build_id: &BuildId, relative_path: &str) -> Result<Option<String>> {
        let path = self.path_for(build_id, relative_path)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Artifact(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[async_trait]
impl ArtifactStore for FilesystemStore {
    async fn persist(&self, build_id: &BuildId, relative_path: &str, content: &str) -> Result<()> {
        let target = self.path_for(build_id, relative_path)?;
        let digest = sha256_hex(content.as_bytes());

        if let Ok(existing) = tokio::fs::read(&target).await
            && sha256_hex(&existing) == digest
        {
            debug!(path = %target.display(), "Artifact unchanged, skipping write");
            return Ok(());
        }

        let parent = target
            .parent()
            .ok_or_else(|| Error::Artifact(format!("No parent for {}", target.display())))?;
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            Error::Artifact(format!("Failed to create {}: {}", parent.display(), e))
        })?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Unique per write: concurrent persists of one path must not share a staging file.
        let staging = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        tokio::fs::write(&staging, content.as_bytes())
            .await
            .map_err(|e| Error::Artifact(format!("Failed to write {}: {}", staging.display(), e)))?;
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(Error::Artifact(format!(
                "Failed to move artifact into {}: {}",
                target.display(),
                e
            )));
        }

        debug!(path = %target.display(), bytes = content.len(), sha256 = %digest, "Artifact persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_persist_under_build_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        let build_id = BuildId::new("session-42");

        store
            .persist(&build_id, "app/api/users/route.ts", "export async function GET() {}")
            .await
            .unwrap();

        let on_disk = dir.path().join("session-42/app/api/users/route.ts");
        assert_eq!(
            std::fs::read_to_string(on_disk).unwrap(),
            "export async function GET() {}"
        );
    }

    #[tokio::test]
    async fn test_repeated_persist_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        let build_id = BuildId::new("bld_1");

        store.persist(&build_id, "lib/types.ts", "type A = {};").await.unwrap();
        let first = std::fs::metadata(store.path_for(&build_id, "lib/types.ts").unwrap())
            .unwrap()
            .modified()
            .unwrap();
        store.persist(&build_id, "lib/types.ts", "type A = {};").await.unwrap();
        let second = std::fs::metadata(store.path_for(&build_id, "lib/types.ts").unwrap())
            .unwrap()
            .modified()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            store.read(&build_id, "lib/types.ts").await.unwrap().as_deref(),
            Some("type A = {};")
        );
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("bld_1/lib"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_persists_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        let content = "export type User = { id: string };".repeat(64);

        for i in 0..50 {
            let build_id = BuildId::new(format!("b{}", i));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let store = store.clone();
                    let build_id = build_id.clone();
                    let content = content.clone();
                    tokio::spawn(async move {
                        store.persist(&build_id, "lib/types.ts", &content).await
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
            assert_eq!(
                store.read(&build_id, "lib/types.ts").await.unwrap().as_deref(),
                Some(content.as_str())
            );
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("b0/lib"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_changed_content_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        let build_id = BuildId::new("bld_1");

        store.persist(&build_id, "lib/data.ts", "v1").await.unwrap();
        store.persist(&build_id, "lib/data.ts", "v2").await.unwrap();

        assert_eq!(store.read(&build_id, "lib/data.ts").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_escaping_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        let err = store
            .persist(&BuildId::new("bld_1"), "../outside.ts", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Artifact(_)));
        assert!(!dir.path().join("outside.ts").exists());
    }

    #[tokio::test]
    async fn test_missing_artifact_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        assert!(store.read(&BuildId::new("b"), "nope.ts").await.unwrap().is_none());
    }
}
