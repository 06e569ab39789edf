//! # GPU Backend Registry
//!
//! Resolves the GPU family detected by the host (passed in via an environment
//! variable set by the container entry script — GPU probing itself is out of
//! scope) into the default FFmpeg flag set the Stream Worker uses to
//! build its command line.

use crate::config::model::contains_shell_metachar;
use crate::error::AppError;

/// A detected GPU family, or `None` if the host found nothing usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuBackend {
    None,
    Nvidia,
    Amd,
    Intel,
}

impl GpuBackend {
    /// Parse the `GPU_BACKEND_DETECTED` contract value. Unrecognized or
    /// absent values fall back to `None` rather than failing startup — the system
    /// still attempts to run without hardware acceleration.
    pub fn from_env_value(value: &str) -> GpuBackend {
        match value.trim().to_ascii_lowercase().as_str() {
            "nvidia" => GpuBackend::Nvidia,
            "amd" => GpuBackend::Amd,
            "intel" => GpuBackend::Intel,
            _ => GpuBackend::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GpuBackend::None => "none",
            GpuBackend::Nvidia => "nvidia",
            GpuBackend::Amd => "amd",
            GpuBackend::Intel => "intel",
        }
    }
}

const BASE_PARAMS: &[&str] =
    &["-hide_banner", "-loglevel", "warning", "-threads", "2", "-rtsp_transport", "tcp", "-timeout", "10000000"];

const MAX_PARAMS_LEN: usize = 20;

/// Process-wide, read-only once constructed at startup from the host-provided env
/// var.
#[derive(Debug, Clone)]
pub struct GpuRegistry {
    backend: GpuBackend,
}

impl GpuRegistry {
    pub fn detect_from_env() -> Self {
        let raw = std::env::var("GPU_BACKEND_DETECTED").unwrap_or_default();
        GpuRegistry { backend: GpuBackend::from_env_value(&raw) }
    }

    pub fn with_backend(backend: GpuBackend) -> Self {
        GpuRegistry { backend }
    }

    pub fn backend(&self) -> GpuBackend {
        self.backend
    }

    /// The base flags plus backend-specific decoder selection.
    pub fn default_params(&self) -> Vec<String> {
        let mut params: Vec<String> = BASE_PARAMS.iter().map(|s| s.to_string()).collect();
        let extra: &[&str] = match self.backend {
            GpuBackend::Nvidia => &["-hwaccel", "cuda", "-hwaccel_output_format", "cuda", "-c:v", "h264_cuvid"],
            GpuBackend::Amd => &["-hwaccel", "amf", "-c:v", "h264_amf"],
            GpuBackend::Intel => &["-hwaccel", "qsv", "-c:v", "h264_qsv"],
            GpuBackend::None => &[],
        };
        params.extend(extra.iter().map(|s| s.to_string()));
        params
    }

    /// Validate a user-supplied `ffmpeg_params` override: bounded
    /// length, no shell metacharacters, and no hw-accel flag that contradicts the
    /// detected backend when hardware acceleration is requested.
    pub fn validate_params(&self, params: &[String], hw_accel_enabled: bool) -> Result<(), AppError> {
        if params.len() > MAX_PARAMS_LEN {
            return Err(AppError::invalid_params(format!(
                "ffmpeg_params may contain at most {MAX_PARAMS_LEN} elements"
            )));
        }
        for param in params {
            if contains_shell_metachar(param) {
                return Err(AppError::invalid_params(format!(
                    "ffmpeg_params element '{param}' contains a shell metacharacter"
                )));
            }
        }
        if hw_accel_enabled && self.backend == GpuBackend::None {
            let requests_hw = params.iter().any(|p| p == "-hwaccel");
            if requests_hw {
                return Err(AppError::invalid_params(
                    "hw_accel_enabled requires a detected GPU backend, but none was found",
                ));
            }
        }
        Ok(())
    }
}
