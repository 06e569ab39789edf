//! Shared application state threaded through every axum handler via `State`.

use std::sync::Arc;

use crate::http::middleware::RateLimiter;
use crate::metrics::SharedMetrics;
use crate::registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub metrics: SharedMetrics,
    pub limiter: Arc<RateLimiter>,
}
