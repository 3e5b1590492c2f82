//! Host-facing bridge and composition root.
//!
//! [`LlamaBridge`] wires the model lifecycle and the download pipe behind a
//! single [`CommandQueue`]. Every method returns immediately; results arrive
//! through the returned [`Pending`] futures, in submission order.

pub mod params;

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, GenerationConfig, ModelConfig};
use crate::download::pipe::DownloadPipe;
use crate::download::transport::{HttpTransport, Transport};
use crate::download::DownloadProgress;
use crate::error::BridgeError;
use crate::inference::lifecycle::{GenerateResponse, LifecycleState, ModelLifecycle};
use crate::inference::llama_ffi::LlamaBackend;
use crate::metrics::BridgeMetrics;
use crate::queue::{panic_message, CommandQueue, Pending};
use crate::storage::{ModelFileInfo, StorageRoot};

pub use params::{DownloadModelParams, GenerateParams, LoadModelParams, ModelExistsParams};

/// State owned by the queue's worker thread.
pub struct Worker {
    lifecycle: ModelLifecycle,
    downloads: DownloadPipe,
}

/// Snapshot of the lifecycle, readable without a queue round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub state: LifecycleState,
    pub model_path: Option<PathBuf>,
}

/// An in-flight download: progress notifications, then the final outcome.
pub struct DownloadJob {
    pub progress: mpsc::UnboundedReceiver<DownloadProgress>,
    pub done: Pending<()>,
}

impl DownloadJob {
    /// Drain every progress notification, then wait for the outcome.
    pub async fn collect(mut self) -> (Vec<DownloadProgress>, Result<(), BridgeError>) {
        let mut events = Vec::new();
        while let Some(event) = self.progress.recv().await {
            events.push(event);
        }
        (events, self.done.await)
    }
}

pub struct LlamaBridge {
    queue: CommandQueue<Worker>,
    state_rx: watch::Receiver<LifecycleState>,
    model_path_rx: watch::Receiver<Option<PathBuf>>,
    model_defaults: ModelConfig,
    generation_defaults: GenerationConfig,
    metrics: BridgeMetrics,
}

impl LlamaBridge {
    /// Build the bridge with the blocking HTTP transport.
    pub fn new(config: &Config, backend: Box<dyn LlamaBackend>) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(config.download.connect_timeout(), &config.download.user_agent);
        Self::with_transport(config, backend, Arc::new(transport))
    }

    /// Build the bridge with an explicit transport.
    pub fn with_transport(
        config: &Config,
        backend: Box<dyn LlamaBackend>,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        let storage = StorageRoot::new(&config.storage.root);
        storage.ensure()?;

        let lifecycle = ModelLifecycle::new(backend, storage.clone());
        let state_rx = lifecycle.subscribe();
        let model_path_rx = lifecycle.subscribe_model_path();
        let downloads = DownloadPipe::new(storage.clone(), transport, config.download.chunk_size);

        let queue = CommandQueue::spawn(Worker {
            lifecycle,
            downloads,
        })?;

        info!(
            storage_root = %storage.path().display(),
            chunk_size = config.download.chunk_size,
            "Bridge started"
        );

        Ok(Self {
            queue,
            state_rx,
            model_path_rx,
            model_defaults: config.model.clone(),
            generation_defaults: config.generation.clone(),
            metrics: BridgeMetrics::new()?,
        })
    }

    /// Load a model, replacing any loaded one.
    pub fn load_model(&self, params: LoadModelParams) -> Pending<()> {
        match params.into_request(&self.model_defaults) {
            Ok(request) => self.dispatch("loadModel", move |worker| worker.lifecycle.load(request)),
            Err(e) => self.reject("loadModel", e),
        }
    }

    /// Generate text with the loaded model.
    pub fn generate(&self, params: GenerateParams) -> Pending<GenerateResponse> {
        match params.into_request(&self.generation_defaults) {
            Ok(request) => self.dispatch("generate", move |worker| worker.lifecycle.generate(request)),
            Err(e) => self.reject("generate", e),
        }
    }

    /// Download a model file into the storage root.
    pub fn download_model(&self, params: DownloadModelParams) -> DownloadJob {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        let done = match params.into_request() {
            Ok(request) => {
                let metrics = self.metrics.clone();
                self.dispatch("downloadModel", move |worker| {
                    let summary = worker.downloads.run(&request, &progress_tx)?;
                    metrics.record_download_bytes(summary.bytes_written);
                    Ok(())
                })
            }
            Err(e) => self.reject("downloadModel", e),
        };

        DownloadJob {
            progress: progress_rx,
            done,
        }
    }

    /// Release the loaded model. Succeeds when nothing is loaded.
    pub fn unload(&self) -> Pending<()> {
        self.dispatch("unload", |worker| {
            worker.lifecycle.unload();
            Ok(())
        })
    }

    /// Check whether a model file is present, in queue order with downloads.
    pub fn model_exists(&self, params: ModelExistsParams) -> Pending<ModelFileInfo> {
        match params.into_path() {
            Ok(path) => self.dispatch("modelExists", move |worker| {
                Ok(worker.lifecycle.storage().inspect_model(&path))
            }),
            Err(e) => self.reject("modelExists", e),
        }
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            state: *self.state_rx.borrow(),
            model_path: self.model_path_rx.borrow().clone(),
        }
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    /// Prometheus exposition with a fresh queue depth sample.
    pub fn render_metrics(&self) -> String {
        self.metrics.set_queue_pending(self.queue.pending());
        self.metrics.render()
    }

    /// Stop accepting calls, let the in-flight one finish, and release the model.
    pub async fn shutdown(&self) {
        info!("Shutting down bridge");
        self.queue.shutdown().await;
    }

    fn dispatch<T, F>(&self, method: &'static str, task: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Worker) -> Result<T, BridgeError> + Send + 'static,
    {
        let call_id = Uuid::new_v4();
        let metrics = self.metrics.clone();
        debug!(%call_id, method, "Host call submitted");

        self.queue.submit(method, move |worker: &mut Worker| {
            let span = info_span!("call", %call_id, method);
            let _enter = span.enter();

            // Caught here as well as in the queue so the outcome is counted.
            let result = panic::catch_unwind(AssertUnwindSafe(|| task(worker)))
                .unwrap_or_else(|payload| Err(BridgeError::TaskPanicked(panic_message(&*payload))));
            match &result {
                Ok(_) => debug!("Resolved"),
                Err(e) => warn!(code = e.code(), error = %e, "Rejected"),
            }
            metrics.record_call(method, result.is_ok());
            result
        })
    }

    fn reject<T>(&self, method: &'static str, err: BridgeError) -> Pending<T> {
        warn!(method, code = err.code(), error = %err, "Rejected before queueing");
        self.metrics.record_call(method, false);
        Pending::failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::transport::Source;
    use crate::download::DownloadError;
    use crate::inference::llama_ffi::StubBackend;
    use std::io::Cursor;
    use tempfile::TempDir;

    struct NoNetwork;

    impl Transport for NoNetwork {
        fn open(&self, url: &str) -> Result<Source, DownloadError> {
            Err(DownloadError::Transport(format!("offline: {url}")))
        }
    }

    struct Exploding;

    impl Transport for Exploding {
        fn open(&self, _url: &str) -> Result<Source, DownloadError> {
            panic!("transport crashed")
        }
    }

    struct Fixed(Vec<u8>);

    impl Transport for Fixed {
        fn open(&self, _url: &str) -> Result<Source, DownloadError> {
            Ok(Source::new(Some(self.0.len() as i64), Box::new(Cursor::new(self.0.clone()))))
        }
    }

    fn bridge(tmp: &TempDir, transport: Arc<dyn Transport>) -> (StubBackend, LlamaBridge) {
        let mut config = Config::default();
        config.storage.root = tmp.path().to_path_buf();
        let backend = StubBackend::new();
        let bridge = LlamaBridge::with_transport(&config, Box::new(backend.clone()), transport).unwrap();
        (backend, bridge)
    }

    #[tokio::test]
    async fn test_status_follows_lifecycle() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("model.bin"), b"gguf").unwrap();
        let (_backend, bridge) = bridge(&tmp, Arc::new(NoNetwork));

        assert_eq!(bridge.status().state, LifecycleState::Unloaded);
        bridge.load_model(LoadModelParams::new("model.bin")).await.unwrap();
        let status = bridge.status();
        assert_eq!(status.state, LifecycleState::Ready);
        assert!(status.model_path.unwrap().ends_with("model.bin"));

        bridge.unload().await.unwrap();
        assert_eq!(bridge.status().model_path, None);
    }

    #[tokio::test]
    async fn test_download_failure_rejects_and_worker_survives() {
        let tmp = TempDir::new().unwrap();
        let (_backend, bridge) = bridge(&tmp, Arc::new(NoNetwork));

        let (events, result) = bridge
            .download_model(DownloadModelParams::new("http://x/model.bin", "m.bin"))
            .collect()
            .await;
        assert!(events.is_empty());
        match result {
            Err(BridgeError::DownloadFailed(msg)) => assert!(msg.contains("offline")),
            other => panic!("expected DownloadFailed, got {other:?}"),
        }

        assert!(matches!(
            bridge.generate(GenerateParams::new("hello")).await,
            Err(BridgeError::ModelNotLoaded)
        ));
        assert_eq!(bridge.metrics().calls("downloadModel", "rejected"), 1);
    }

    #[tokio::test]
    async fn test_panicked_call_is_counted() {
        let tmp = TempDir::new().unwrap();
        let (_backend, bridge) = bridge(&tmp, Arc::new(Exploding));

        let (events, result) = bridge
            .download_model(DownloadModelParams::new("http://x/model.bin", "m.bin"))
            .collect()
            .await;
        assert!(events.is_empty());
        match result {
            Err(BridgeError::TaskPanicked(msg)) => assert_eq!(msg, "transport crashed"),
            other => panic!("expected TaskPanicked, got {other:?}"),
        }
        assert_eq!(bridge.metrics().calls("downloadModel", "rejected"), 1);

        bridge.unload().await.unwrap();
        assert_eq!(bridge.metrics().calls("unload", "resolved"), 1);
    }

    #[tokio::test]
    async fn test_new_inside_runtime() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.root = tmp.path().to_path_buf();

        let bridge = LlamaBridge::new(&config, Box::new(StubBackend::new())).unwrap();
        bridge.unload().await.unwrap();
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_download_then_load_in_order() {
        let tmp = TempDir::new().unwrap();
        let (backend, bridge) = bridge(&tmp, Arc::new(Fixed(vec![7u8; 9000])));

        // Submitted back to back: the load must observe the finished file.
        let job = bridge.download_model(DownloadModelParams::new("http://x/m.bin", "m.bin"));
        let exists = bridge.model_exists(ModelExistsParams::new("m.bin"));
        let load = bridge.load_model(LoadModelParams::new("m.bin"));

        let (events, result) = job.collect().await;
        result.unwrap();
        assert_eq!(events.last().map(|e| e.percent_complete), Some(100));
        assert_eq!(exists.await.unwrap().size_bytes, Some(9000));
        load.await.unwrap();
        assert_eq!(backend.live_contexts().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_model() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("model.bin"), b"gguf").unwrap();
        let (backend, bridge) = bridge(&tmp, Arc::new(NoNetwork));

        bridge.load_model(LoadModelParams::new("model.bin")).await.unwrap();
        bridge.shutdown().await;

        assert!(backend.live_contexts().is_empty());
        assert_eq!(backend.freed_contexts().len(), 1);
        assert!(matches!(bridge.unload().await, Err(BridgeError::QueueClosed)));
    }
}
