//! End-to-end tests for the HTTP host surface.
//!
//! The bridge runs with the real blocking HTTP transport; model bytes are
//! served by a second in-process axum server.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

use llama_bridge::bridge::LlamaBridge;
use llama_bridge::config::Config;
use llama_bridge::inference::llama_ffi::StubBackend;
use llama_bridge::server::routes::{build_router, AppState};

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Serves `/model.bin` with a Content-Length and `/chunked.bin` without one.
async fn model_origin() -> String {
    let router = Router::new()
        .route("/model.bin", get(|| async { vec![3u8; 10_000] }))
        .route(
            "/chunked.bin",
            get(|| async {
                let parts = (0..4).map(|_| Ok::<_, std::io::Error>(vec![4u8; 2500]));
                Body::from_stream(futures::stream::iter(parts))
            }),
        );
    serve(router).await
}

async fn bridge_server(tmp: &TempDir) -> (StubBackend, String) {
    let mut config = Config::default();
    config.storage.root = tmp.path().to_path_buf();
    let backend = StubBackend::new();
    let bridge = LlamaBridge::new(&config, Box::new(backend.clone())).unwrap();

    let state = Arc::new(AppState {
        bridge,
        start_time: Instant::now(),
    });
    (backend, serve(build_router(state, true)).await)
}

/// Split an SSE body into `(event, data)` pairs.
fn parse_sse(body: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    for block in body.split("\n\n") {
        let mut name = None;
        let mut data = None;
        for line in block.lines() {
            if let Some(v) = line.strip_prefix("event:") {
                name = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("data:") {
                data = Some(v.trim().to_string());
            }
        }
        if let (Some(name), Some(data)) = (name, data) {
            events.push((name, data));
        }
    }
    events
}

#[tokio::test(flavor = "multi_thread")]
async fn test_plugin_call_flow() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("model.bin"), b"GGUF").unwrap();
    let (_backend, base) = bridge_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/plugin/generate"))
        .json(&json!({"prompt": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "MODEL_NOT_LOADED");
    assert_eq!(body["message"], "Model not loaded");

    let resp = client
        .post(format!("{base}/plugin/loadModel"))
        .json(&json!({"modelPath": "model.bin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["state"], "ready");

    let resp = client
        .post(format!("{base}/plugin/generate"))
        .json(&json!({"prompt": "hello there", "nPredict": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["text"], "hello");

    for _ in 0..2 {
        let resp = client
            .post(format!("{base}/plugin/unload"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_parameter_errors() {
    let tmp = TempDir::new().unwrap();
    let (_backend, base) = bridge_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/plugin/loadModel"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "modelPath required");

    let resp = client
        .post(format!("{base}/plugin/loadModel"))
        .json(&json!({"modelPath": "missing.gguf"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "MODEL_FILE_NOT_FOUND");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_download_streams_progress_then_resolves() {
    let tmp = TempDir::new().unwrap();
    let origin = model_origin().await;
    let (_backend, base) = bridge_server(&tmp).await;
    let client = reqwest::Client::new();

    let body = client
        .post(format!("{base}/plugin/downloadModel"))
        .json(&json!({"sourceUrl": format!("{origin}/model.bin"), "destinationName": "m.bin"}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let events = parse_sse(&body);

    let (last_name, _) = events.last().unwrap();
    assert_eq!(last_name, "resolve");

    let percents: Vec<u64> = events
        .iter()
        .filter(|(name, _)| name == "downloadProgress")
        .map(|(_, data)| serde_json::from_str::<Value>(data).unwrap()["percentComplete"].as_u64().unwrap())
        .collect();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(*percents.last().unwrap(), 100);

    assert_eq!(std::fs::metadata(tmp.path().join("m.bin")).unwrap().len(), 10_000);

    let info: Value = client
        .post(format!("{base}/plugin/modelExists"))
        .json(&json!({"modelPath": "m.bin"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["exists"], true);
    assert_eq!(info["sizeBytes"], 10_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_download_without_length_and_failures() {
    let tmp = TempDir::new().unwrap();
    let origin = model_origin().await;
    let (_backend, base) = bridge_server(&tmp).await;
    let client = reqwest::Client::new();

    let body = client
        .post(format!("{base}/plugin/downloadModel"))
        .json(&json!({"url": format!("{origin}/chunked.bin"), "filename": "c.bin"}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let events = parse_sse(&body);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "resolve");
    assert_eq!(std::fs::metadata(tmp.path().join("c.bin")).unwrap().len(), 10_000);

    let body = client
        .post(format!("{base}/plugin/downloadModel"))
        .json(&json!({"sourceUrl": format!("{origin}/missing.bin"), "destinationName": "x.bin"}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let events = parse_sse(&body);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "reject");
    let rejection: Value = serde_json::from_str(&events[0].1).unwrap();
    assert_eq!(rejection["code"], "DOWNLOAD_FAILED");
    assert_eq!(rejection["message"], "Download failed: HTTP status 404");

    let metrics = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("llama_bridge_download_bytes_total 10000"));
}
