//! llama-bridge binary: wires the bridge to the HTTP host surface.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use llama_bridge::bridge::{LlamaBridge, LoadModelParams};
use llama_bridge::config::{Cli, Config};
use llama_bridge::inference::llama_ffi::LlamaBackend;
use llama_bridge::server::routes::{build_router, AppState};

#[cfg(feature = "native")]
fn backend() -> Box<dyn LlamaBackend> {
    Box::new(llama_bridge::inference::llama_ffi::native::NativeBackend)
}

#[cfg(not(feature = "native"))]
fn backend() -> Box<dyn LlamaBackend> {
    warn!("Built without the `native` feature: using the stub backend");
    Box::new(llama_bridge::inference::llama_ffi::StubBackend::new())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "llama_bridge=debug,tower_http=debug"
    } else {
        "llama_bridge=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_thread_names(true)
        .init();

    info!("llama-bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?.with_overrides(&cli);

    info!(
        storage_root = %config.storage.root.display(),
        thread_count = config.model.thread_count,
        context_size = config.model.context_size,
        "Configuration loaded"
    );

    // Composition root: backend, queue, lifecycle and downloads.
    let bridge = LlamaBridge::new(&config, backend())?;

    if let Some(model) = &config.model.autoload {
        match bridge.load_model(LoadModelParams::new(model.clone())).await {
            Ok(()) => info!(model, "Autoloaded model"),
            Err(e) => warn!(model, error = %e, "Autoload failed"),
        }
    }

    let state = Arc::new(AppState {
        bridge,
        start_time: Instant::now(),
    });

    let app = build_router(state.clone(), config.server.cors_permissive);

    let listen_addr = &config.server.listen;
    let listener = TcpListener::bind(listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release the native context before exit.
    state.bridge.shutdown().await;

    Ok(())
}
