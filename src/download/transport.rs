//! Byte sources for the download pipe.

use std::io::Read;
use std::sync::OnceLock;
use std::time::Duration;

use tracing::debug;

use crate::download::DownloadError;

/// An opened remote body.
pub struct Source {
    /// Declared total length, when the transport reports a positive one.
    pub content_length: Option<u64>,

    /// Body stream.
    pub reader: Box<dyn Read + Send>,
}

impl Source {
    /// Build a source from a declared length that may be missing or negative.
    pub fn new(declared_length: Option<i64>, reader: Box<dyn Read + Send>) -> Self {
        Self {
            content_length: declared_length.and_then(|n| u64::try_from(n).ok()),
            reader,
        }
    }
}

/// Opens a streaming body for a URL.
pub trait Transport: Send + Sync {
    fn open(&self, url: &str) -> Result<Source, DownloadError>;
}

/// Blocking HTTP(S) transport.
///
/// The blocking client owns a private runtime, which must not be created or
/// dropped on an async runtime thread. It is built on first use, on the
/// command queue's worker thread, and dropped there with the worker state.
pub struct HttpTransport {
    connect_timeout: Duration,
    user_agent: String,
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, user_agent: &str) -> Self {
        Self {
            connect_timeout,
            user_agent: user_agent.to_string(),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client, DownloadError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            // Model files are large; no overall deadline.
            .timeout(None)
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(|e| DownloadError::Transport(e.to_string()))?;
        debug!(user_agent = self.user_agent, "Built HTTP client");

        Ok(self.client.get_or_init(|| client))
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &str) -> Result<Source, DownloadError> {
        let response = self
            .client()?
            .get(url)
            .send()
            .map_err(|e| DownloadError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status.as_u16()));
        }

        let content_length = response.content_length();
        debug!(url, status = status.as_u16(), ?content_length, "Opened download source");

        Ok(Source::new(
            content_length.and_then(|n| i64::try_from(n).ok()),
            Box::new(response),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_negative_length_is_unknown() {
        let source = Source::new(Some(-1), Box::new(Cursor::new(Vec::new())));
        assert_eq!(source.content_length, None);
        let source = Source::new(Some(10), Box::new(Cursor::new(Vec::new())));
        assert_eq!(source.content_length, Some(10));
    }

    #[tokio::test]
    async fn test_construct_and_drop_inside_runtime() {
        let transport = HttpTransport::new(Duration::from_secs(5), "llama-bridge-test");
        assert!(transport.client.get().is_none());
        drop(transport);
    }
}
