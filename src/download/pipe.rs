//! Chunked download loop.
//!
//! Copies a [`Source`] into a file under the storage root in fixed-size
//! chunks and reports progress as integer percentages over a channel.

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::download::transport::{Source, Transport};
use crate::download::{DownloadError, DownloadProgress, DownloadRequest};
use crate::error::BridgeError;
use crate::storage::StorageRoot;

/// Reference chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Turns byte counts into strictly increasing integer percentages.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: Option<u64>,
    transferred: u64,
    last_percent: u8,
}

impl ProgressTracker {
    /// `total` of `None` or `Some(0)` disables progress.
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|&t| t > 0),
            transferred: 0,
            last_percent: 0,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Record `n` more bytes. Returns the new percentage only when it moved
    /// past the last one reported.
    pub fn advance(&mut self, n: u64) -> Option<u8> {
        self.transferred = self.transferred.saturating_add(n);
        let total = self.total?;

        let percent = (u128::from(self.transferred) * 100 / u128::from(total)).min(100) as u8;
        if percent > self.last_percent {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}

/// Outcome of a finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub path: PathBuf,
    pub bytes_written: u64,
}

pub struct DownloadPipe {
    storage: StorageRoot,
    transport: Arc<dyn Transport>,
    chunk_size: usize,
}

impl DownloadPipe {
    pub fn new(storage: StorageRoot, transport: Arc<dyn Transport>, chunk_size: usize) -> Self {
        Self {
            storage,
            transport,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Fetch `request.source_url` into the storage root, sending progress on
    /// `progress`. A closed progress receiver does not stop the transfer.
    pub fn run(
        &self,
        request: &DownloadRequest,
        progress: &mpsc::UnboundedSender<DownloadProgress>,
    ) -> Result<DownloadSummary, BridgeError> {
        let dest = self.storage.resolve_destination(&request.destination_name)?;
        let started = Instant::now();

        info!(url = request.source_url, dest = %dest.display(), "Starting download");

        let bytes_written = self
            .copy(&request.source_url, &dest, progress)
            .map_err(|e| {
                warn!(url = request.source_url, error = %e, "Download failed");
                BridgeError::DownloadFailed(e.to_string())
            })?;

        info!(
            dest = %dest.display(),
            bytes = bytes_written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Download complete"
        );

        Ok(DownloadSummary {
            path: dest,
            bytes_written,
        })
    }

    fn copy(
        &self,
        url: &str,
        dest: &std::path::Path,
        progress: &mpsc::UnboundedSender<DownloadProgress>,
    ) -> Result<u64, DownloadError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Sink first, so an unwritable destination fails before any network I/O.
        let mut output = BufWriter::new(File::create(dest)?);
        let Source {
            content_length,
            mut reader,
        } = self.transport.open(url)?;

        let mut tracker = ProgressTracker::new(content_length);
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            output.write_all(&buf[..n])?;

            if let Some(percent) = tracker.advance(n as u64) {
                debug!(percent, transferred = tracker.transferred(), "Download progress");
                let _ = progress.send(DownloadProgress {
                    percent_complete: percent,
                });
            }
        }

        output.flush()?;
        Ok(tracker.transferred())
    }
}
