//! Errors surfaced to the host as rejected calls.
//!
//! Every failure inside the worker is converted into a [`BridgeError`] at the
//! operation boundary. The `Display` text is the human-readable rejection
//! message; [`BridgeError::code`] is a stable machine-readable tag.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("{0} required")]
    MissingParameter(&'static str),

    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Model file not found: {}", .0.display())]
    ModelFileNotFound(PathBuf),

    #[error("Failed to initialize llama context")]
    EngineInitFailed,

    #[error("Error loading model: {0}")]
    ModelLoadError(String),

    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("prompt required")]
    MissingPrompt,

    #[error("Generation error: {0}")]
    GenerationError(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("command queue is closed")]
    QueueClosed,

    #[error("task panicked: {0}")]
    TaskPanicked(String),
}

impl BridgeError {
    /// Stable identifier for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::MissingParameter(_) => "MISSING_PARAMETER",
            BridgeError::InvalidParameter { .. } => "INVALID_PARAMETER",
            BridgeError::ModelFileNotFound(_) => "MODEL_FILE_NOT_FOUND",
            BridgeError::EngineInitFailed => "ENGINE_INIT_FAILED",
            BridgeError::ModelLoadError(_) => "MODEL_LOAD_ERROR",
            BridgeError::ModelNotLoaded => "MODEL_NOT_LOADED",
            BridgeError::MissingPrompt => "MISSING_PROMPT",
            BridgeError::GenerationError(_) => "GENERATION_ERROR",
            BridgeError::DownloadFailed(_) => "DOWNLOAD_FAILED",
            BridgeError::QueueClosed => "QUEUE_CLOSED",
            BridgeError::TaskPanicked(_) => "TASK_PANICKED",
        }
    }

    /// Whether the caller supplied bad input (as opposed to an engine or I/O failure).
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            BridgeError::MissingParameter(_)
                | BridgeError::InvalidParameter { .. }
                | BridgeError::MissingPrompt
        )
    }

    /// Serializable form handed back to the host.
    pub fn to_rejection(&self) -> Rejection {
        Rejection {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// A rejected host call.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub code: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_host_contract() {
        assert_eq!(BridgeError::ModelNotLoaded.to_string(), "Model not loaded");
        assert_eq!(
            BridgeError::MissingParameter("modelPath").to_string(),
            "modelPath required"
        );
        assert_eq!(
            BridgeError::ModelFileNotFound(PathBuf::from("/data/m.gguf")).to_string(),
            "Model file not found: /data/m.gguf"
        );
        assert_eq!(
            BridgeError::DownloadFailed("connection reset".into()).to_string(),
            "Download failed: connection reset"
        );
    }

    #[test]
    fn test_rejection_carries_code() {
        let rejection = BridgeError::EngineInitFailed.to_rejection();
        assert_eq!(rejection.code, "ENGINE_INIT_FAILED");
        assert_eq!(rejection.message, "Failed to initialize llama context");
        assert!(BridgeError::MissingPrompt.is_caller_error());
        assert!(!BridgeError::ModelNotLoaded.is_caller_error());
    }
}
