//! # Metrics Surface
//!
//! A process-wide [`prometheus_client`] registry exposed at `GET /metrics`.
//! Every counter/gauge/histogram this crate reports lives here; callers
//! elsewhere in the crate hold a cheap `Arc<Metrics>` clone and touch only the
//! handles relevant to them.

use std::sync::Arc;

use prometheus_client::encoding::{text::encode, EncodeLabelSet};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StreamLabel {
    pub stream_id: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub route: String,
    pub status: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabel {
    pub route: String,
}

/// Holds every metric this crate reports plus the `Registry` they're registered into.
/// Built once at startup and shared as an `Arc` across the HTTP state,
/// Workers, and the Fan-out Hub.
pub struct Metrics {
    registry: Registry,

    pub http_requests_total: Family<HttpLabel, Counter>,
    pub http_request_duration_seconds: Family<RouteLabel, Histogram>,

    pub streams_created_total: Counter,
    pub streams_deleted_total: Counter,
    pub streams_reordered_total: Counter,

    pub pipeline_frames_emitted_total: Family<StreamLabel, Counter>,
    pub pipeline_frames_dropped_total: Family<StreamLabel, Counter>,
    pub pipeline_buffer_overflow_total: Family<StreamLabel, Counter>,
    pub mjpeg_frames_dropped_total: Family<StreamLabel, Counter>,
    pub worker_restarts_total: Family<StreamLabel, Counter>,

    pub active_mjpeg_subscribers: Family<StreamLabel, Gauge>,
    pub active_workers: Gauge,
    pub stream_fps: Family<StreamLabel, Gauge<f64, std::sync::atomic::AtomicU64>>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("rtsp_gateway");

        let http_requests_total = Family::<HttpLabel, Counter>::default();
        registry.register("http_requests", "Total HTTP requests handled", http_requests_total.clone());

        let http_request_duration_seconds = Family::<RouteLabel, Histogram>::new_with_constructor(|| {
            Histogram::new([0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0].into_iter())
        });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
            http_request_duration_seconds.clone(),
        );

        let streams_created_total = Counter::default();
        registry.register("streams_created", "Total streams created", streams_created_total.clone());

        let streams_deleted_total = Counter::default();
        registry.register("streams_deleted", "Total streams deleted", streams_deleted_total.clone());

        let streams_reordered_total = Counter::default();
        registry.register(
            "streams_reordered",
            "Total reorder operations applied",
            streams_reordered_total.clone(),
        );

        let pipeline_frames_emitted_total = Family::<StreamLabel, Counter>::default();
        registry.register(
            "pipeline_frames_emitted",
            "Frames that passed the FPS gate and were published",
            pipeline_frames_emitted_total.clone(),
        );

        let pipeline_frames_dropped_total = Family::<StreamLabel, Counter>::default();
        registry.register(
            "pipeline_frames_dropped",
            "Frames discarded by the FPS gate",
            pipeline_frames_dropped_total.clone(),
        );

        let pipeline_buffer_overflow_total = Family::<StreamLabel, Counter>::default();
        registry.register(
            "pipeline_buffer_overflow",
            "Times the JPEG framer discarded a buffer that exceeded the size cap",
            pipeline_buffer_overflow_total.clone(),
        );

        let mjpeg_frames_dropped_total = Family::<StreamLabel, Counter>::default();
        registry.register(
            "mjpeg_frames_dropped",
            "Frames dropped for a slow MJPEG subscriber",
            mjpeg_frames_dropped_total.clone(),
        );

        let worker_restarts_total = Family::<StreamLabel, Counter>::default();
        registry.register("worker_restarts", "Total worker restart attempts", worker_restarts_total.clone());

        let active_mjpeg_subscribers = Family::<StreamLabel, Gauge>::default();
        registry.register(
            "active_mjpeg_subscribers",
            "Currently connected MJPEG subscribers",
            active_mjpeg_subscribers.clone(),
        );

        let active_workers = Gauge::default();
        registry.register("active_workers", "Currently running stream workers", active_workers.clone());

        let stream_fps = Family::<StreamLabel, Gauge<f64, std::sync::atomic::AtomicU64>>::default();
        registry.register("stream_fps", "EMA of emitted frames per second over the last 2s", stream_fps.clone());

        Metrics {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            streams_created_total,
            streams_deleted_total,
            streams_reordered_total,
            pipeline_frames_emitted_total,
            pipeline_frames_dropped_total,
            pipeline_buffer_overflow_total,
            mjpeg_frames_dropped_total,
            worker_restarts_total,
            active_mjpeg_subscribers,
            active_workers,
            stream_fps,
        }
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buf = String::new();
        // `encode` only fails on a `fmt::Write` error, which a `String` never
        // produces.
        encode(&mut buf, &self.registry).expect("encoding metrics into a String cannot fail");
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

pub type SharedMetrics = Arc<Metrics>;
