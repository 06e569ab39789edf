//! # RTSP Gateway
//!
//! A LAN-deployed service that pulls a handful of RTSP camera streams through
//! FFmpeg subprocesses, re-serves them as rate-limited MJPEG over HTTP, and
//! exposes a REST control plane plus Prometheus metrics for an operator
//! dashboard.
//!
//! ## Architecture
//!
//! - **Config Store** ([`config`]): the on-disk YAML catalogue of streams and
//!   the atomic load/save machinery around it.
//! - **GPU Backend Registry** ([`gpu`]): resolves the host's detected hardware
//!   decoder family into FFmpeg's default flags.
//! - **Frame Pipeline** ([`pipeline`]): demuxes an MJPEG byte stream from
//!   FFmpeg's stdout into discrete JPEG frames and gates them to the
//!   configured FPS.
//! - **Stream Worker** ([`worker`]): owns one FFmpeg subprocess's lifecycle —
//!   spawn, warmup, watchdog, graceful stop, and exponential-backoff restart.
//! - **Fan-out Hub** ([`hub`]): broadcasts frames to MJPEG subscribers and
//!   scores to SSE subscribers without the Worker knowing who, or how many,
//!   are listening.
//! - **Stream Registry** ([`registry`]): the in-memory source of truth for
//!   stream records and their Workers, serializing every mutation behind a
//!   single writer lock before persisting.
//! - **Metrics Surface** ([`metrics`]): the Prometheus registry and every
//!   counter/gauge/histogram the rest of the crate updates.
//! - **HTTP Control Plane** ([`http`]): the REST CRUD surface, MJPEG/SSE push
//!   endpoints, health/metrics, and the SPA fallback.
//! - **Error Taxonomy** ([`error`]): the single `AppError` type shared by
//!   every fallible boundary above.

pub mod config;
pub mod error;
pub mod gpu;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod worker;
