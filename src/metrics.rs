//! Prometheus metrics for host calls and downloads.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct BridgeMetrics {
    registry: Registry,
    calls: IntCounterVec,
    download_bytes: IntCounter,
    queue_pending: IntGauge,
}

impl BridgeMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let calls = IntCounterVec::new(
            Opts::new("llama_bridge_calls_total", "Host calls by method and outcome"),
            &["method", "outcome"],
        )?;
        let download_bytes = IntCounter::new(
            "llama_bridge_download_bytes_total",
            "Bytes written by completed downloads",
        )?;
        let queue_pending = IntGauge::new(
            "llama_bridge_queue_pending",
            "Tasks submitted to the command queue and not yet finished",
        )?;

        registry.register(Box::new(calls.clone()))?;
        registry.register(Box::new(download_bytes.clone()))?;
        registry.register(Box::new(queue_pending.clone()))?;

        Ok(Self {
            registry,
            calls,
            download_bytes,
            queue_pending,
        })
    }

    pub fn record_call(&self, method: &str, ok: bool) {
        let outcome = if ok { "resolved" } else { "rejected" };
        self.calls.with_label_values(&[method, outcome]).inc();
    }

    pub fn record_download_bytes(&self, bytes: u64) {
        self.download_bytes.inc_by(bytes);
    }

    pub fn set_queue_pending(&self, pending: usize) {
        self.queue_pending.set(pending as i64);
    }

    pub fn calls(&self, method: &str, outcome: &str) -> u64 {
        self.calls.with_label_values(&[method, outcome]).get()
    }

    /// Text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
