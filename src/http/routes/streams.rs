//! CRUD, reorder, and start/stop handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::config::{Patch, Stream};
use crate::error::AppError;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateStreamRequest {
    pub name: String,
    pub rtsp_url: String,
    #[serde(default)]
    pub ffmpeg_params: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GpuBackendResponse {
    pub gpu_backend: &'static str,
}

#[derive(Debug, Serialize)]
pub struct FfmpegDefaultsResponse {
    pub combined_params: String,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub order: Vec<String>,
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<Stream>> {
    Json(state.registry.list())
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateStreamRequest>,
) -> Result<Response, AppError> {
    let stream = state.registry.create(&body.name, &body.rtsp_url, body.ffmpeg_params)?;
    state.metrics.streams_created_total.inc();
    Ok((StatusCode::CREATED, Json(stream)).into_response())
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Stream>, AppError> {
    state.registry.get(&id).map(Json).ok_or_else(|| AppError::not_found(id))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<Patch>,
) -> Result<Json<Stream>, AppError> {
    state.registry.update(&id, patch).map(Json)
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    state.registry.delete(&id)?;
    state.metrics.streams_deleted_total.inc();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reorder(
    State(state): State<AppState>,
    Json(body): Json<ReorderRequest>,
) -> Result<StatusCode, AppError> {
    state.registry.reorder(body.order)?;
    Ok(StatusCode::OK)
}

pub async fn start(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    state.registry.start(&id)?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    state.registry.stop(&id)?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn gpu_backend(State(state): State<AppState>) -> Json<GpuBackendResponse> {
    Json(GpuBackendResponse { gpu_backend: state.registry.gpu_backend().as_str() })
}

pub async fn ffmpeg_defaults(State(state): State<AppState>) -> Json<FfmpegDefaultsResponse> {
    Json(FfmpegDefaultsResponse { combined_params: state.registry.ffmpeg_default_params().join(" ") })
}
