//! Model lifecycle: the sole owner of the native context.
//!
//! Holds zero or one [`ModelHandle`] and walks it through
//! `Unloaded -> Loading -> Ready -> Unloading -> Unloaded`. All methods take
//! `&mut self` and are only ever called from the command queue's worker, so
//! the handle is never touched concurrently.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::inference::llama_ffi::{ContextParams, LlamaBackend, ModelHandle, SamplingParams};
use crate::queue::panic_message;
use crate::storage::StorageRoot;

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Ready,
    Unloading,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Unloaded => write!(f, "unloaded"),
            LifecycleState::Loading => write!(f, "loading"),
            LifecycleState::Ready => write!(f, "ready"),
            LifecycleState::Unloading => write!(f, "unloading"),
        }
    }
}

/// A validated load request.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Absolute, or relative to the storage root.
    pub model_path: String,
    pub thread_count: u32,
    pub context_size: u32,
}

/// A validated generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
}

struct LoadedModel {
    handle: ModelHandle,
    path: PathBuf,
    params: ContextParams,
}

/// Owner of the current model context.
pub struct ModelLifecycle {
    backend: Box<dyn LlamaBackend>,
    storage: StorageRoot,
    current: Option<LoadedModel>,
    state_tx: watch::Sender<LifecycleState>,
    loaded_path_tx: watch::Sender<Option<PathBuf>>,
}

impl ModelLifecycle {
    pub fn new(backend: Box<dyn LlamaBackend>, storage: StorageRoot) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Unloaded);
        let (loaded_path_tx, _) = watch::channel(None);
        Self {
            backend,
            storage,
            current: None,
            state_tx,
            loaded_path_tx,
        }
    }

    /// Watch lifecycle transitions from outside the worker.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Watch the path of the loaded model.
    pub fn subscribe_model_path(&self) -> watch::Receiver<Option<PathBuf>> {
        self.loaded_path_tx.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.is_some()
    }

    pub fn loaded_path(&self) -> Option<&PathBuf> {
        self.current.as_ref().map(|m| &m.path)
    }

    pub fn storage(&self) -> &StorageRoot {
        &self.storage
    }

    fn set_state(&self, state: LifecycleState) {
        self.state_tx.send_replace(state);
    }

    /// Load a model, replacing any model already loaded.
    pub fn load(&mut self, request: LoadRequest) -> Result<(), BridgeError> {
        let path = self.storage.resolve_model_path(&request.model_path);
        if !path.is_file() {
            warn!(path = %path.display(), "Model file not found");
            return Err(BridgeError::ModelFileNotFound(path));
        }

        self.set_state(LifecycleState::Loading);

        // One model in memory at a time.
        if let Some(previous) = self.current.take() {
            info!(path = %previous.path.display(), "Releasing previous model before load");
            self.backend.free(previous.handle);
            self.loaded_path_tx.send_replace(None);
        }

        let params = ContextParams {
            n_ctx: request.context_size,
            n_threads: request.thread_count,
        };

        info!(
            path = %path.display(),
            n_threads = params.n_threads,
            n_ctx = params.n_ctx,
            "Loading model"
        );

        // A panic in native construction is a load failure like any other.
        let init = panic::catch_unwind(AssertUnwindSafe(|| self.backend.init(&path, &params)));
        let raw = match init {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                self.set_state(LifecycleState::Unloaded);
                return Err(BridgeError::ModelLoadError(e.to_string()));
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                warn!(path = %path.display(), error = %message, "Native init panicked");
                self.set_state(LifecycleState::Unloaded);
                return Err(BridgeError::ModelLoadError(message));
            }
        };

        let Some(handle) = ModelHandle::from_raw(raw) else {
            self.set_state(LifecycleState::Unloaded);
            return Err(BridgeError::EngineInitFailed);
        };

        debug!(ctx = handle.as_raw(), "Native context created");
        self.loaded_path_tx.send_replace(Some(path.clone()));
        self.current = Some(LoadedModel {
            handle,
            path,
            params,
        });
        self.set_state(LifecycleState::Ready);
        info!("Model ready");

        Ok(())
    }

    /// Run one generation against the loaded model.
    pub fn generate(&mut self, request: GenerateRequest) -> Result<GenerateResponse, BridgeError> {
        let model = self.current.as_ref().ok_or(BridgeError::ModelNotLoaded)?;
        if request.prompt.is_empty() {
            return Err(BridgeError::MissingPrompt);
        }

        let sampling = SamplingParams {
            n_predict: request.max_tokens,
            temperature: request.temperature,
        };

        debug!(
            prompt_chars = request.prompt.chars().count(),
            n_predict = sampling.n_predict,
            temperature = sampling.temperature,
            n_ctx = model.params.n_ctx,
            "Starting generation"
        );

        let text = panic::catch_unwind(AssertUnwindSafe(|| {
            self.backend.generate(&model.handle, &request.prompt, &sampling)
        }))
        .map_err(|payload| {
            let message = panic_message(&*payload);
            warn!(error = %message, "Native generation panicked");
            BridgeError::GenerationError(message)
        })?
        .map_err(|e| BridgeError::GenerationError(e.to_string()))?;

        info!(output_chars = text.chars().count(), "Generation complete");
        Ok(GenerateResponse { text })
    }

    /// Release the loaded model, if any. Always succeeds.
    pub fn unload(&mut self) {
        let Some(model) = self.current.take() else {
            debug!("Unload requested with no model loaded");
            return;
        };

        self.set_state(LifecycleState::Unloading);
        self.backend.free(model.handle);
        self.loaded_path_tx.send_replace(None);
        self.set_state(LifecycleState::Unloaded);
        info!(path = %model.path.display(), "Model unloaded");
    }
}

impl Drop for ModelLifecycle {
    fn drop(&mut self) {
        if self.current.is_some() {
            info!("Releasing model on teardown");
            self.unload();
        }
    }
}
