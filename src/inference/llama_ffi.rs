//! Boundary to the native llama.cpp shim.
//!
//! The core only sees the [`LlamaBackend`] trait: create a context from a
//! model file, generate text with it, free it. A context is represented by a
//! move-only [`ModelHandle`]; the raw value `0` is the failure sentinel and
//! never becomes a handle.
//!
//! [`StubBackend`] simulates the library in-process for the default build
//! and for tests. The real bindings live in [`native`] behind the `native`
//! feature.

use std::collections::HashMap;
use std::num::NonZeroI64;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlamaError {
    #[error("Failed to load model: {0}")]
    ModelLoadFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Unknown context: {0}")]
    UnknownContext(i64),
}

/// Raw context reference as returned by the native `init` entry point.
pub type RawContext = i64;

/// Context parameters (mirrors the `init` arguments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextParams {
    /// Context size in tokens.
    pub n_ctx: u32,

    /// Number of threads for computation.
    pub n_threads: u32,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 2048,
            n_threads: 8,
        }
    }
}

/// Sampling parameters (mirrors the `generate` arguments).
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    /// Maximum tokens to predict.
    pub n_predict: u32,

    /// Sampling temperature (0.0 = greedy).
    pub temperature: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            n_predict: 512,
            temperature: 0.2,
        }
    }
}

/// Exclusive ownership of one live native context.
///
/// Not `Clone` or `Copy`: the only way to get rid of a handle is to pass it
/// to [`LlamaBackend::free`], so a context cannot be freed twice or used
/// after it was freed.
#[derive(Debug, PartialEq, Eq)]
pub struct ModelHandle(NonZeroI64);

impl ModelHandle {
    /// Wrap a raw `init` result. `None` for the zero sentinel.
    pub(crate) fn from_raw(raw: RawContext) -> Option<Self> {
        NonZeroI64::new(raw).map(Self)
    }

    pub fn as_raw(&self) -> RawContext {
        self.0.get()
    }
}

/// The three native entry points.
pub trait LlamaBackend: Send {
    /// Create a context for the model at `model_path`. Returns `Ok(0)` when
    /// the library reports failure without an error.
    fn init(&mut self, model_path: &Path, params: &ContextParams) -> Result<RawContext, LlamaError>;

    /// Generate a completion for `prompt`.
    fn generate(
        &mut self,
        ctx: &ModelHandle,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<String, LlamaError>;

    /// Release a context.
    fn free(&mut self, ctx: ModelHandle);
}

/// A simulated context.
#[derive(Debug, Clone)]
pub struct StubContext {
    pub model_path: String,
    pub params: ContextParams,
    pub generations: usize,
}

#[derive(Debug, Default)]
struct StubState {
    next_ctx: i64,
    live: HashMap<RawContext, StubContext>,
    freed: Vec<RawContext>,
    refuse_init: bool,
}

/// In-process stand-in for the native library.
///
/// Clones share state, so a test can keep one clone to observe what the
/// bridge did with the other.
#[derive(Debug, Clone, Default)]
pub struct StubBackend {
    state: Arc<Mutex<StubState>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `init` return the failure sentinel.
    pub fn refuse_init(&self, refuse: bool) {
        self.lock().refuse_init = refuse;
    }

    /// Raw references of contexts that are currently allocated.
    pub fn live_contexts(&self) -> Vec<RawContext> {
        let mut live: Vec<_> = self.lock().live.keys().copied().collect();
        live.sort_unstable();
        live
    }

    /// Raw references passed to `free`, in call order.
    pub fn freed_contexts(&self) -> Vec<RawContext> {
        self.lock().freed.clone()
    }

    pub fn context(&self, raw: RawContext) -> Option<StubContext> {
        self.lock().live.get(&raw).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deterministic completion: the first `n_predict` whitespace tokens of
    /// the prompt, echoed back.
    pub fn expected_completion(prompt: &str, n_predict: u32) -> String {
        prompt
            .split_whitespace()
            .take(n_predict as usize)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl LlamaBackend for StubBackend {
    fn init(&mut self, model_path: &Path, params: &ContextParams) -> Result<RawContext, LlamaError> {
        let mut state = self.lock();
        if state.refuse_init {
            return Ok(0);
        }
        if !model_path.is_file() {
            return Err(LlamaError::ModelLoadFailed(format!(
                "cannot open {}",
                model_path.display()
            )));
        }

        state.next_ctx += 1;
        let raw = state.next_ctx;
        state.live.insert(
            raw,
            StubContext {
                model_path: model_path.display().to_string(),
                params: params.clone(),
                generations: 0,
            },
        );
        Ok(raw)
    }

    fn generate(
        &mut self,
        ctx: &ModelHandle,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<String, LlamaError> {
        let mut state = self.lock();
        let context = state
            .live
            .get_mut(&ctx.as_raw())
            .ok_or(LlamaError::UnknownContext(ctx.as_raw()))?;
        context.generations += 1;
        Ok(Self::expected_completion(prompt, params.n_predict))
    }

    fn free(&mut self, ctx: ModelHandle) {
        let mut state = self.lock();
        let raw = ctx.as_raw();
        state.live.remove(&raw);
        state.freed.push(raw);
    }
}

#[cfg(feature = "native")]
pub mod native {
    //! `extern "C"` bindings to the prebuilt `llama-bridge` shim library.

    use std::ffi::{c_char, c_int, CStr, CString};
    use std::path::Path;

    use super::{ContextParams, LlamaBackend, LlamaError, ModelHandle, RawContext, SamplingParams};

    extern "C" {
        fn llama_bridge_init(model_path: *const c_char, n_threads: c_int, n_ctx: c_int) -> i64;
        fn llama_bridge_generate(
            ctx: i64,
            prompt: *const c_char,
            n_predict: c_int,
            temperature: f32,
        ) -> *mut c_char;
        fn llama_bridge_string_free(s: *mut c_char);
        fn llama_bridge_free(ctx: i64);
    }

    /// Backend calling into the linked shim library.
    #[derive(Debug, Default)]
    pub struct NativeBackend;

    fn to_c_int(value: u32, what: &str) -> Result<c_int, LlamaError> {
        c_int::try_from(value).map_err(|_| LlamaError::InvalidInput(format!("{what} out of range: {value}")))
    }

    impl LlamaBackend for NativeBackend {
        fn init(&mut self, model_path: &Path, params: &ContextParams) -> Result<RawContext, LlamaError> {
            let path = model_path
                .to_str()
                .ok_or_else(|| LlamaError::InvalidInput("model path is not valid UTF-8".into()))?;
            let path = CString::new(path).map_err(|e| LlamaError::InvalidInput(e.to_string()))?;
            let n_threads = to_c_int(params.n_threads, "n_threads")?;
            let n_ctx = to_c_int(params.n_ctx, "n_ctx")?;

            // SAFETY: `path` is a valid NUL-terminated string that outlives the call.
            Ok(unsafe { llama_bridge_init(path.as_ptr(), n_threads, n_ctx) })
        }

        fn generate(
            &mut self,
            ctx: &ModelHandle,
            prompt: &str,
            params: &SamplingParams,
        ) -> Result<String, LlamaError> {
            let prompt = CString::new(prompt).map_err(|e| LlamaError::InvalidInput(e.to_string()))?;
            let n_predict = to_c_int(params.n_predict, "n_predict")?;

            // SAFETY: `ctx` is a live context owned by the caller; `prompt` outlives the call.
            let out = unsafe {
                llama_bridge_generate(ctx.as_raw(), prompt.as_ptr(), n_predict, params.temperature)
            };
            if out.is_null() {
                return Err(LlamaError::DecodeFailed("native generate returned null".into()));
            }

            // SAFETY: non-null pointer returned by the shim, freed exactly once below.
            let text = unsafe { CStr::from_ptr(out) }.to_string_lossy().into_owned();
            unsafe { llama_bridge_string_free(out) };
            Ok(text)
        }

        fn free(&mut self, ctx: ModelHandle) {
            // SAFETY: consuming the handle guarantees this context is freed once.
            unsafe { llama_bridge_free(ctx.as_raw()) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_zero_is_not_a_handle() {
        assert!(ModelHandle::from_raw(0).is_none());
        assert_eq!(ModelHandle::from_raw(7).unwrap().as_raw(), 7);
    }

    #[test]
    fn test_stub_lifecycle() {
        let model = NamedTempFile::new().unwrap();
        let mut backend = StubBackend::new();
        let observer = backend.clone();

        let raw = backend.init(model.path(), &ContextParams::default()).unwrap();
        let handle = ModelHandle::from_raw(raw).unwrap();
        assert_eq!(observer.live_contexts(), vec![raw]);

        let text = backend
            .generate(&handle, "one two three", &SamplingParams { n_predict: 2, temperature: 0.0 })
            .unwrap();
        assert_eq!(text, "one two");

        backend.free(handle);
        assert!(observer.live_contexts().is_empty());
        assert_eq!(observer.freed_contexts(), vec![raw]);
    }

    #[test]
    fn test_stub_refuse_init_returns_sentinel() {
        let model = NamedTempFile::new().unwrap();
        let mut backend = StubBackend::new();
        backend.refuse_init(true);
        assert_eq!(backend.init(model.path(), &ContextParams::default()).unwrap(), 0);
    }
}
