//! Private, application-scoped storage root.
//!
//! Model files and downloads live under a single directory. Model paths may
//! be absolute; download destinations must stay inside the root.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::BridgeError;

/// Result of inspecting a model file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFileInfo {
    pub exists: bool,
    pub path: PathBuf,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
}

impl StorageRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if it does not exist yet.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a model path: absolute paths are used as-is, anything else
    /// is relative to the storage root.
    pub fn resolve_model_path(&self, model_path: &str) -> PathBuf {
        let candidate = Path::new(model_path);
        if candidate.has_root() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }

    /// Resolve a download destination. Only plain relative names are
    /// accepted so the result can never leave the root.
    pub fn resolve_destination(&self, name: &str) -> Result<PathBuf, BridgeError> {
        let relative = Path::new(name);
        if name.trim().is_empty() {
            return Err(BridgeError::MissingParameter("destinationName"));
        }

        let escapes = relative.components().any(|c| {
            !matches!(c, Component::Normal(_) | Component::CurDir)
        });
        if escapes {
            return Err(BridgeError::InvalidParameter {
                name: "destinationName",
                reason: format!("{name:?} must be a relative path inside the storage root"),
            });
        }

        Ok(self.root.join(relative))
    }

    /// Stat a model file without loading it.
    pub fn inspect_model(&self, model_path: &str) -> ModelFileInfo {
        let path = self.resolve_model_path(model_path);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => ModelFileInfo {
                exists: true,
                size_bytes: Some(meta.len()),
                path,
            },
            _ => ModelFileInfo {
                exists: false,
                size_bytes: None,
                path,
            },
        }
    }
}
