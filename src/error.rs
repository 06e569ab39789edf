//! # Error Taxonomy
//!
//! A single hierarchical error type shared by every fallible boundary in the gateway:
//! the config store, the GPU backend registry, the stream registry, and the REST
//! handlers. Each variant fixes its own HTTP status and REST error code and
//! carries enough context to produce a useful log line without leaking internals to
//! the client.
//!
//! ## Architecture
//!
//! - **Error Types**: a flat enum, one variant per REST error code, each holding an
//!   [`ErrorContext`] for operation/detail strings attached as the error propagates.
//! - **Classification**: severity (log level only, never the REST status) and
//!   `retryable()` (whether a Worker restart loop should count this failure).
//! - **Rendering**: `IntoResponse` maps every variant straight to the JSON body and
//!   status code fixed by the error code table.
//!
//! ## Usage
//!
//! ```rust
//! use rtsp_gateway::error::AppError;
//!
//! let error = AppError::duplicate_name("Front Door").with_operation("registry.create");
//! assert_eq!(error.code(), rtsp_gateway::error::ErrorCode::DuplicateName);
//! ```

use std::fmt;
use std::time::SystemTime;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// How loudly a given error should be logged. Never affects the REST status code,
/// which is fixed per [`AppError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorSeverity::Debug => "debug",
            ErrorSeverity::Info => "info",
            ErrorSeverity::Warning => "warning",
            ErrorSeverity::Error => "error",
            ErrorSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Context accumulated as an error crosses module boundaries.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub operation: Option<String>,
    pub detail: Option<String>,
    pub timestamp: Option<SystemTime>,
}

impl ErrorContext {
    fn stamped() -> Self {
        Self { operation: None, detail: None, timestamp: Some(SystemTime::now()) }
    }
}

/// The REST error code returned in `{code, message, details?}` bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRtspUrl,
    DuplicateName,
    InvalidParams,
    InvalidOrder,
    NotFound,
    ConcurrencyLimit,
    GpuUnavailable,
    StreamNotRunning,
    RateLimited,
    Internal,
}

/// Process-wide error type. Every variant fixes its HTTP status and [`ErrorCode`];
/// `context` carries whatever operation-specific detail was attached on the way up.
#[derive(Debug)]
pub enum AppError {
    InvalidRtspUrl { reason: String, context: ErrorContext },
    DuplicateName { name: String, context: ErrorContext },
    InvalidParams { reason: String, context: ErrorContext },
    InvalidOrder { reason: String, context: ErrorContext },
    NotFound { id: String, context: ErrorContext },
    ConcurrencyLimit { limit: usize, context: ErrorContext },
    GpuUnavailable { context: ErrorContext },
    StreamNotRunning { id: String, context: ErrorContext },
    RateLimited { retry_after_secs: u64, context: ErrorContext },
    ConfigIo { source: std::io::Error, context: ErrorContext },
    Schema { reason: String, context: ErrorContext },
    Internal { reason: String, context: ErrorContext },
}

impl AppError {
    pub fn invalid_rtsp_url(reason: impl Into<String>) -> Self {
        AppError::InvalidRtspUrl { reason: reason.into(), context: ErrorContext::stamped() }
    }

    pub fn duplicate_name(name: impl Into<String>) -> Self {
        AppError::DuplicateName { name: name.into(), context: ErrorContext::stamped() }
    }

    pub fn invalid_params(reason: impl Into<String>) -> Self {
        AppError::InvalidParams { reason: reason.into(), context: ErrorContext::stamped() }
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        AppError::InvalidOrder { reason: reason.into(), context: ErrorContext::stamped() }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        AppError::NotFound { id: id.into(), context: ErrorContext::stamped() }
    }

    pub fn concurrency_limit(limit: usize) -> Self {
        AppError::ConcurrencyLimit { limit, context: ErrorContext::stamped() }
    }

    pub fn gpu_unavailable() -> Self {
        AppError::GpuUnavailable { context: ErrorContext::stamped() }
    }

    pub fn stream_not_running(id: impl Into<String>) -> Self {
        AppError::StreamNotRunning { id: id.into(), context: ErrorContext::stamped() }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        AppError::RateLimited { retry_after_secs, context: ErrorContext::stamped() }
    }

    pub fn schema(reason: impl Into<String>) -> Self {
        AppError::Schema { reason: reason.into(), context: ErrorContext::stamped() }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        AppError::Internal { reason: reason.into(), context: ErrorContext::stamped() }
    }

    /// Attach an operation name; used as the error bubbles up through call sites that
    /// want to say *where* it happened without changing *what* happened.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.context_mut().detail = Some(detail.into());
        self
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            AppError::InvalidRtspUrl { context, .. }
            | AppError::DuplicateName { context, .. }
            | AppError::InvalidParams { context, .. }
            | AppError::InvalidOrder { context, .. }
            | AppError::NotFound { context, .. }
            | AppError::ConcurrencyLimit { context, .. }
            | AppError::GpuUnavailable { context }
            | AppError::StreamNotRunning { context, .. }
            | AppError::RateLimited { context, .. }
            | AppError::ConfigIo { context, .. }
            | AppError::Schema { context, .. }
            | AppError::Internal { context, .. } => context,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            AppError::InvalidRtspUrl { context, .. }
            | AppError::DuplicateName { context, .. }
            | AppError::InvalidParams { context, .. }
            | AppError::InvalidOrder { context, .. }
            | AppError::NotFound { context, .. }
            | AppError::ConcurrencyLimit { context, .. }
            | AppError::GpuUnavailable { context }
            | AppError::StreamNotRunning { context, .. }
            | AppError::RateLimited { context, .. }
            | AppError::ConfigIo { context, .. }
            | AppError::Schema { context, .. }
            | AppError::Internal { context, .. } => context,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidRtspUrl { .. } => ErrorCode::InvalidRtspUrl,
            AppError::DuplicateName { .. } => ErrorCode::DuplicateName,
            AppError::InvalidParams { .. } => ErrorCode::InvalidParams,
            AppError::InvalidOrder { .. } => ErrorCode::InvalidOrder,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::ConcurrencyLimit { .. } => ErrorCode::ConcurrencyLimit,
            AppError::GpuUnavailable { .. } => ErrorCode::GpuUnavailable,
            AppError::StreamNotRunning { .. } => ErrorCode::StreamNotRunning,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::ConfigIo { .. } | AppError::Schema { .. } | AppError::Internal { .. } => {
                ErrorCode::Internal
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidRtspUrl { .. }
            | AppError::DuplicateName { .. }
            | AppError::InvalidParams { .. }
            | AppError::InvalidOrder { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::ConcurrencyLimit { .. } => StatusCode::CONFLICT,
            AppError::GpuUnavailable { .. } | AppError::StreamNotRunning { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ConfigIo { .. } | AppError::Schema { .. } | AppError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Log-level-only classification.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AppError::InvalidRtspUrl { .. }
            | AppError::DuplicateName { .. }
            | AppError::InvalidParams { .. }
            | AppError::InvalidOrder { .. }
            | AppError::NotFound { .. } => ErrorSeverity::Info,
            AppError::RateLimited { .. } => ErrorSeverity::Debug,
            AppError::ConcurrencyLimit { .. }
            | AppError::GpuUnavailable { .. }
            | AppError::StreamNotRunning { .. } => ErrorSeverity::Warning,
            AppError::ConfigIo { .. } | AppError::Schema { .. } => ErrorSeverity::Critical,
            AppError::Internal { .. } => ErrorSeverity::Error,
        }
    }

    /// Whether a Worker encountering this error should count it toward its restart
    /// backoff, as opposed to a client-fault error that should simply be returned.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            AppError::ConfigIo { .. } | AppError::Internal { .. } | AppError::GpuUnavailable { .. }
        )
    }

    fn message(&self) -> String {
        match self {
            AppError::InvalidRtspUrl { reason, .. } => reason.clone(),
            AppError::DuplicateName { name, .. } => {
                format!("a stream named '{name}' already exists")
            }
            AppError::InvalidParams { reason, .. } => reason.clone(),
            AppError::InvalidOrder { reason, .. } => reason.clone(),
            AppError::NotFound { id, .. } => format!("no stream with id '{id}'"),
            AppError::ConcurrencyLimit { limit, .. } => {
                format!("starting this stream would exceed the limit of {limit} running workers")
            }
            AppError::GpuUnavailable { .. } => {
                "hardware acceleration was required but no GPU backend was detected".to_string()
            }
            AppError::StreamNotRunning { id, .. } => format!("stream '{id}' is not running"),
            AppError::RateLimited { .. } => "too many requests".to_string(),
            AppError::ConfigIo { .. } | AppError::Schema { .. } | AppError::Internal { .. } => {
                "internal server error".to_string()
            }
        }
    }

    fn code_str(&self) -> &'static str {
        match self.code() {
            ErrorCode::InvalidRtspUrl => "INVALID_RTSP_URL",
            ErrorCode::DuplicateName => "DUPLICATE_NAME",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::InvalidOrder => "INVALID_ORDER",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ConcurrencyLimit => "CONCURRENCY_LIMIT",
            ErrorCode::GpuUnavailable => "GPU_UNAVAILABLE",
            ErrorCode::StreamNotRunning => "STREAM_NOT_RUNNING",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::ConfigIo { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::ConfigIo { source: e, context: ErrorContext::stamped() }
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(e: serde_yaml::Error) -> Self {
        AppError::Schema { reason: e.to_string(), context: ErrorContext::stamped() }
    }
}

/// Error classification utilities, mirroring what a Worker or the Registry needs to
/// decide without matching on every variant by hand.
pub mod classify {
    use super::*;

    pub fn is_client_fault(error: &AppError) -> bool {
        matches!(
            error,
            AppError::InvalidRtspUrl { .. }
                | AppError::DuplicateName { .. }
                | AppError::InvalidParams { .. }
                | AppError::InvalidOrder { .. }
                | AppError::NotFound { .. }
        )
    }

    pub fn requires_operator_attention(error: &AppError) -> bool {
        error.severity() >= ErrorSeverity::Critical
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    // Filled in by the request middleware, which is the only place that knows
    // the minted request id; left `None` here since `AppError` itself is
    // built with no access to the in-flight request.
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            AppError::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        };
        let body = ErrorBody { code: self.code(), message: self.message(), details: None, request_id: None };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}
