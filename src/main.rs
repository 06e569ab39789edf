use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use rtsp_gateway::config::ConfigStore;
use rtsp_gateway::gpu::GpuRegistry;
use rtsp_gateway::metrics::Metrics;
use rtsp_gateway::registry::Registry;

/// LAN-deployed RTSP-to-MJPEG gateway with a REST control plane.
#[derive(Parser, Debug)]
#[command(name = "gatewayd")]
#[command(about = "Pull RTSP streams through FFmpeg and re-serve them as MJPEG over HTTP")]
struct Args {
    /// HTTP listen port.
    #[arg(long, env = "APP_PORT", default_value_t = 8000)]
    port: u16,

    /// Path to the stream catalogue YAML file.
    #[arg(long, env = "CONFIG_PATH", default_value = "/app/config/config.yml")]
    config: String,
}

/// Extra margin over a Worker's own 5s stop grace so the last
/// stdout/stderr reader task has time to observe the closed pipe and exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(6);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let gpu = GpuRegistry::detect_from_env();

    if std::env::var("CI_DRY_RUN").map(|v| v == "true").unwrap_or(false) {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        println!("gpu_backend={}", gpu.backend().as_str());
        return Ok(());
    }

    let store = ConfigStore::new(&args.config);
    let metrics = Arc::new(Metrics::new());
    let registry = Registry::load(store, Arc::new(gpu.clone()), metrics.clone())?;

    let app = rtsp_gateway::http::build(registry.clone(), metrics);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, gpu_backend = gpu.backend().as_str(), "gatewayd listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for stream in registry.list() {
        let _ = registry.stop(&stream.id);
    }
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    Ok(())
}

/// Resolves on `SIGINT` or `SIGTERM` so the caller can give running Workers
/// their stop grace period before the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
