//! Plugin-style HTTP surface.
//!
//! One POST route per host method, named-parameter JSON bodies:
//! - POST /plugin/loadModel
//! - POST /plugin/generate
//! - POST /plugin/downloadModel (SSE)
//! - POST /plugin/unload
//! - POST /plugin/modelExists
//! - GET /health
//! - GET /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bridge::{
    DownloadModelParams, GenerateParams, LlamaBridge, LoadModelParams, ModelExistsParams,
};
use crate::error::BridgeError;
use crate::inference::lifecycle::{GenerateResponse, LifecycleState};
use crate::server::streaming::download_to_sse_stream;
use crate::storage::ModelFileInfo;

/// Application state shared across handlers.
pub struct AppState {
    pub bridge: LlamaBridge,
    pub start_time: Instant,
}

/// Build the axum router with all plugin routes.
pub fn build_router(state: Arc<AppState>, cors_permissive: bool) -> Router {
    let router = Router::new()
        .route("/plugin/loadModel", post(load_model))
        .route("/plugin/generate", post(generate))
        .route("/plugin/downloadModel", post(download_model))
        .route("/plugin/unload", post(unload))
        .route("/plugin/modelExists", post(model_exists))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

// ─── Rejections ────────────────────────────────────────────────────────────

/// A rejected call rendered as an HTTP response.
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &BridgeError) -> StatusCode {
    match err {
        e if e.is_caller_error() => StatusCode::BAD_REQUEST,
        BridgeError::ModelFileNotFound(_) => StatusCode::NOT_FOUND,
        BridgeError::ModelNotLoaded => StatusCode::CONFLICT,
        BridgeError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_for(&self.0), Json(self.0.to_rejection())).into_response()
    }
}

// ─── Response Types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Resolved {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub state: LifecycleState,
    pub model_path: Option<String>,
    pub uptime_secs: u64,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn load_model(
    State(state): State<Arc<AppState>>,
    Json(params): Json<LoadModelParams>,
) -> Result<Json<Resolved>, ApiError> {
    info!(model_path = ?params.model_path, "loadModel");
    state.bridge.load_model(params).await?;
    Ok(Json(Resolved {}))
}

async fn generate(
    State(state): State<Arc<AppState>>,
    Json(params): Json<GenerateParams>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let response = state.bridge.generate(params).await?;
    Ok(Json(response))
}

async fn download_model(
    State(state): State<Arc<AppState>>,
    Json(params): Json<DownloadModelParams>,
) -> impl IntoResponse {
    info!(source_url = ?params.source_url, destination = ?params.destination_name, "downloadModel");
    let job = state.bridge.download_model(params);
    Sse::new(download_to_sse_stream(job)).keep_alive(KeepAlive::default())
}

async fn unload(State(state): State<Arc<AppState>>) -> Result<Json<Resolved>, ApiError> {
    state.bridge.unload().await?;
    Ok(Json(Resolved {}))
}

async fn model_exists(
    State(state): State<Arc<AppState>>,
    Json(params): Json<ModelExistsParams>,
) -> Result<Json<ModelFileInfo>, ApiError> {
    Ok(Json(state.bridge.model_exists(params).await?))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.bridge.status();
    Json(HealthResponse {
        status: "ok".to_string(),
        state: status.state,
        model_path: status.model_path.map(|p| p.display().to_string()),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.bridge.render_metrics(),
    )
}
