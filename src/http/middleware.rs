//! # Rate Limiter & Request Middleware
//!
//! Two concerns layered over every request:
//! - a request id is minted, attached to the tracing span, and echoed back in the
//!   `x-request-id` header and in every error body;
//! - a per-remote-host token bucket gates mutating `/api/*` routes. Built on the
//!   same lock-free-counter idiom the rest of this codebase uses for its ring
//!   buffer and concurrency accounting — there is no token-bucket crate in the
//!   dependency stack to reach for.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::AppError;
use crate::http::state::AppState;
use crate::metrics::{HttpLabel, RouteLabel};

/// Response bodies above this size are left untouched rather than buffered to
/// inject a request id; nothing this gateway returns as an error body is
/// anywhere near this large.
const MAX_BODY_FOR_REQUEST_ID_INJECTION: usize = 64 * 1024;

const SUSTAINED_RATE_PER_SEC: f64 = 5.0;
const BURST: f64 = 10.0;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// One token bucket per remote host, created lazily on first mutating request.
pub struct RateLimiter {
    buckets: DashMap<IpAddr, Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter { buckets: DashMap::new() }
    }

    /// Returns `Ok(())` if the request may proceed, or `Err(retry_after_secs)`.
    fn check(&self, host: IpAddr) -> Result<(), u64> {
        let entry = self.buckets.entry(host).or_insert_with(|| {
            Mutex::new(Bucket { tokens: BURST, last_refill: Instant::now() })
        });
        let mut bucket = entry.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * SUSTAINED_RATE_PER_SEC).min(BURST);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait_secs = (deficit / SUSTAINED_RATE_PER_SEC).ceil().max(1.0) as u64;
            Err(wait_secs)
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter::new()
    }
}

fn is_rate_limited_route(method: &Method, path: &str) -> bool {
    matches!(*method, Method::POST | Method::PATCH | Method::PUT | Method::DELETE) && path.starts_with("/api/")
}

/// The request id attached as a typed request extension so handlers and the error
/// body renderer can read it back out.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Mints a request id, wraps the handler in a tracing span carrying it, rate
/// limits mutating `/api/*` calls per remote host, and records the
/// `http_requests_total`/`http_request_duration_seconds` metrics for every
/// response that leaves this layer.
pub async fn request_context(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let started_at = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = tracing::info_span!("http_request", request_id = %request_id, method = %method, path = %path);

    async move {
        let response = if is_rate_limited_route(&method, &path) {
            match state.limiter.check(addr.ip()) {
                Ok(()) => next.run(req).await,
                Err(retry_after) => {
                    let error = AppError::rate_limited(retry_after).with_operation("http.rate_limit");
                    error.into_response()
                }
            }
        } else {
            next.run(req).await
        };

        let mut response = attach_request_id(response, &request_id).await;
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        state
            .metrics
            .http_requests_total
            .get_or_create(&HttpLabel {
                method: method.to_string(),
                route: path.clone(),
                status: response.status().as_u16().to_string(),
            })
            .inc();
        state
            .metrics
            .http_request_duration_seconds
            .get_or_create(&RouteLabel { route: path.clone() })
            .observe(started_at.elapsed().as_secs_f64());

        response
    }
    .instrument(span)
    .await
}

/// Injects `request_id` into a JSON error body's top level so a caller who
/// only has the body (no headers) can still correlate it with server logs.
/// Leaves non-error and non-JSON responses untouched.
async fn attach_request_id(response: Response, request_id: &str) -> Response {
    if !response.status().is_client_error() && !response.status().is_server_error() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_FOR_REQUEST_ID_INJECTION).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        parts.headers.remove(axum::http::header::CONTENT_LENGTH);
        return Response::from_parts(parts, Body::from(bytes));
    };

    if let serde_json::Value::Object(map) = &mut value {
        map.insert("request_id".to_string(), serde_json::Value::String(request_id.to_string()));
    }

    let rewritten = serde_json::to_vec(&value).unwrap_or_else(|_| bytes.to_vec());
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(rewritten))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn attaches_request_id_to_an_error_body() {
        let response = AppError::not_found("abc").into_response();
        let response = attach_request_id(response, "req-123").await;
        let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["request_id"], "req-123");
        assert_eq!(value["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn leaves_success_bodies_untouched() {
        let response = (axum::http::StatusCode::OK, "ok").into_response();
        let response = attach_request_id(response, "req-123").await;
        let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }
}
