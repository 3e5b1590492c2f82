//! llama-bridge: serialized host bridge for an on-device llama engine.
//!
//! All access to the single native model context, and every model download,
//! goes through one FIFO command queue drained by a dedicated worker thread.
//! The host submits calls without blocking and gets results back as futures.

pub mod bridge;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod queue;
pub mod server;
pub mod storage;
