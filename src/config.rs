//! Runtime configuration for llama-bridge.
//!
//! Configuration is loaded from a JSON file; every section falls back to its
//! defaults when omitted. A few CLI flags override the file.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "llama-bridge", about = "Serialized host bridge for an on-device llama engine")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Private storage root for models and downloads (overrides the config file).
    #[arg(long)]
    pub storage_root: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host surface settings.
    pub server: ServerConfig,

    /// Storage root settings.
    pub storage: StorageConfig,

    /// Model load defaults.
    pub model: ModelConfig,

    /// Generation defaults.
    pub generation: GenerationConfig,

    /// Download settings.
    pub download: DownloadConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:8787").
    pub listen: String,

    /// Allow any origin (the UI shell runs in a webview with its own origin).
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".to_string(),
            cors_permissive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory that relative model paths and download names resolve against.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("files"),
        }
    }
}

/// Model load defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Threads used when a load call omits `threadCount`.
    pub thread_count: u32,

    /// Context size used when a load call omits `contextSize`.
    pub context_size: u32,

    /// Model to load at startup, if any.
    pub autoload: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            thread_count: 8,
            context_size: 2048,
            autoload: None,
        }
    }
}

/// Generation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.2,
        }
    }
}

/// Download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Copy buffer size in bytes.
    pub chunk_size: usize,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// User-Agent header sent with download requests.
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            connect_timeout_secs: 30,
            user_agent: format!("llama-bridge/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DownloadConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply CLI overrides on top of the loaded file.
    pub fn with_overrides(mut self, cli: &Cli) -> Self {
        if let Some(listen) = &cli.listen {
            self.server.listen = listen.clone();
        }
        if let Some(root) = &cli.storage_root {
            self.storage.root = root.clone();
        }
        self
    }
}
