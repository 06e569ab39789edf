//! `GET /health` and `GET /metrics`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::gpu::GpuBackend;
use crate::http::state::AppState;

#[derive(Debug, Serialize)]
struct StreamHealth {
    id: String,
    status: crate::config::StreamStatus,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    streams: Vec<StreamHealth>,
    gpu_backend: &'static str,
}

pub async fn health(State(state): State<AppState>) -> Response {
    let backend = state.registry.gpu_backend();
    let records = state.registry.list();
    let gpu_required = records.iter().any(|s| s.hw_accel_enabled);
    let streams: Vec<StreamHealth> =
        records.into_iter().map(|s| StreamHealth { id: s.id, status: s.status }).collect();

    let ok = !(gpu_required && backend == GpuBackend::None);
    let body = HealthResponse {
        status: if ok { "ok" } else { "unavailable" },
        streams,
        gpu_backend: backend.as_str(),
    };

    let code = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body)).into_response()
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}
