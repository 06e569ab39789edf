//! HTTP control plane wiring: mounts the REST CRUD surface, the
//! MJPEG and SSE push endpoints, health/metrics, and the SPA fallback behind
//! the request-id/rate-limit middleware.

pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::http::middleware::{request_context, RateLimiter};
use crate::http::state::AppState;
use crate::metrics::SharedMetrics;
use crate::registry::Registry;

/// Static asset directory the SPA is served from; populated by an external
/// build step.
pub const STATIC_ROOT: &str = "static";

pub fn build(registry: Arc<Registry>, metrics: SharedMetrics) -> Router {
    let state = AppState { registry, metrics, limiter: Arc::new(RateLimiter::new()) };

    let api = Router::new()
        .route("/streams", get(routes::streams::list).post(routes::streams::create))
        .route("/streams/gpu-backend", get(routes::streams::gpu_backend))
        .route("/streams/ffmpeg-defaults", get(routes::streams::ffmpeg_defaults))
        .route("/streams/reorder", post(routes::streams::reorder))
        .route(
            "/streams/{id}",
            get(routes::streams::get).patch(routes::streams::update).delete(routes::streams::delete),
        )
        .route("/streams/{id}/start", post(routes::streams::start))
        .route("/streams/{id}/stop", post(routes::streams::stop))
        .route("/streams/{id}/mjpeg", get(routes::mjpeg::mjpeg))
        .route("/streams/{id}/scores", get(routes::sse::scores));

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/metrics", get(routes::health::metrics))
        .nest("/api", api)
        .fallback_service(routes::static_files::service(STATIC_ROOT))
        .layer(axum::middleware::from_fn_with_state(state.clone(), request_context))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
