//! Native inference boundary and model lifecycle.
//!
//! - [`llama_ffi`]: the native entry points, the move-only handle and the stub backend
//! - [`lifecycle`]: ownership of the current model context

pub mod lifecycle;
pub mod llama_ffi;
