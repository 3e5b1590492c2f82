//! Model downloads.
//!
//! - [`transport`]: byte sources (blocking HTTP)
//! - [`pipe`]: chunked copy to the storage root with integer progress

pub mod pipe;
pub mod transport;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),
}

/// A validated download request.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub source_url: String,
    /// Relative to the storage root.
    pub destination_name: String,
}

/// Progress notification: emitted once per new integer percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub percent_complete: u8,
}
