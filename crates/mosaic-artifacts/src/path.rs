//! Relative artifact path handling.

use mosaic_core::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Validate an artifact path and return it in normalized form.
///
/// The path must be relative and must stay inside the build directory:
/// `.` segments are dropped and any `..`, root or prefix component is
/// rejected.
pub fn normalize_relative(relative_path: &str) -> Result<PathBuf> {
    let trimmed = relative_path.trim();
    if trimmed.is_empty() {
        return Err(Error::Artifact("artifact path is empty".to_string()));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::Artifact(format!(
                    "artifact path escapes the build directory: {}",
                    relative_path
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Artifact(format!(
                    "artifact path must be relative: {}",
                    relative_path
                )));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::Artifact(format!(
            "artifact path names no file: {}",
            relative_path
        )));
    }
    Ok(normalized)
}
