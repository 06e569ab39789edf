//! Shared test-app and registry helpers used across the integration suite.

use std::sync::Arc;

use rtsp_gateway::config::ConfigStore;
use rtsp_gateway::gpu::{GpuBackend, GpuRegistry};
use rtsp_gateway::metrics::Metrics;
use rtsp_gateway::registry::Registry;
use serde_json::Value;

/// Build a fully-wired router backed by a throwaway config file so no real
/// FFmpeg process is ever spawned.
pub fn test_app() -> axum::Router {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("config.yml"));
    let gpu = Arc::new(GpuRegistry::with_backend(GpuBackend::None));
    let metrics = Arc::new(Metrics::new());
    let registry = Registry::load(store, gpu, metrics.clone()).unwrap();
    // Keep the tempdir alive for the process lifetime of this test by leaking
    // it; each test gets its own directory so there is no cross-test state.
    std::mem::forget(dir);
    rtsp_gateway::http::build(registry, metrics)
}

/// Same backing store as [`test_app`], but returning the `Registry` directly
/// for tests that drive it without going through HTTP.
pub fn test_registry() -> (Arc<Registry>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("config.yml"));
    let gpu = Arc::new(GpuRegistry::with_backend(GpuBackend::None));
    let metrics = Arc::new(Metrics::new());
    let registry = Registry::load(store, gpu, metrics).unwrap();
    (registry, dir)
}

pub async fn body_json(response: axum::response::Response) -> Value {
    use http_body_util::BodyExt;
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn json_request(method: &str, uri: &str, body: Value) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}
