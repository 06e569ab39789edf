//! `GET /api/streams/{id}/scores` — per-frame detection scores over SSE (spec
//! §4.G, §6: `data: <json>\n\n`, heartbeat every 15s of silence).

use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::config::StreamStatus;
use crate::error::AppError;
use crate::http::state::AppState;

pub async fn scores(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, AppError> {
    let status = state.registry.worker_status(&id);
    let runnable = matches!(status, Some(StreamStatus::Running) | Some(StreamStatus::Disconnected));
    if !runnable {
        return Err(AppError::stream_not_running(id));
    }

    let hub = state.registry.hub(&id).ok_or_else(|| AppError::stream_not_running(id.clone()))?;
    let receiver = hub.subscribe_scores();

    let events = BroadcastStream::new(receiver).filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().data(json))),
            Err(_) => None,
        },
        // A lagging SSE subscriber just misses old score events; the next one
        // still arrives (scores are advisory, not persisted).
        Err(_lagged) => None,
    });

    Ok(Sse::new(Box::pin(events) as std::pin::Pin<Box<dyn Stream<Item = _> + Send>>)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive")))
}
