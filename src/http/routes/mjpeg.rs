//! `GET /api/streams/{id}/mjpeg` — the multipart push stream.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream;

use crate::config::StreamStatus;
use crate::error::AppError;
use crate::hub::MjpegSubscription;
use crate::http::state::AppState;
use crate::pipeline::encode_multipart_end;

pub async fn mjpeg(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
    let status = state.registry.worker_status(&id);
    let runnable = matches!(status, Some(StreamStatus::Running) | Some(StreamStatus::Disconnected));
    if !runnable {
        return Err(AppError::stream_not_running(id));
    }

    let hub = state.registry.hub(&id).ok_or_else(|| AppError::stream_not_running(id.clone()))?;
    let subscription = hub.subscribe_mjpeg();
    let body = Body::from_stream(mjpeg_body_stream(subscription));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")
        .header(header::CACHE_CONTROL, "no-store")
        .body(body)
        .expect("static header values are always valid")
        .into_response())
}

enum StreamState {
    Active(MjpegSubscription),
    Done,
}

/// Yields multipart parts until the subscriber disconnects or the worker stops,
/// then yields the closing `--frame--` sentinel exactly once.
fn mjpeg_body_stream(
    subscription: MjpegSubscription,
) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> {
    stream::unfold(StreamState::Active(subscription), |state| async move {
        match state {
            StreamState::Active(mut sub) => match sub.next_part().await {
                Some(part) => Some((Ok(part), StreamState::Active(sub))),
                None => Some((Ok(encode_multipart_end()), StreamState::Done)),
            },
            StreamState::Done => None,
        }
    })
}
