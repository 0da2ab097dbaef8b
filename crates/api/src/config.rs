use std::path::PathBuf;

use mhr_pipeline::model::{InferenceOptions, ModelConfig, SUBPROCESS_BACKEND};

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`). If taken, the server scans forward for
    /// a free one.
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`
    /// env var. The single entry `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `300`). Bounds the upload
    /// request, not the job's own runtime.
    pub request_timeout_secs: u64,
    /// Root of the persisted result tree (default: `output`).
    pub output_dir: PathBuf,
    /// Upload size cap in bytes, checked against `Content-Length` before
    /// the multipart body is parsed (default: 500 MiB).
    pub max_upload_bytes: u64,
    /// Entry cap of the per-frame result cache (default: `50`).
    pub frame_cache_cap: usize,
    /// Reconstruction model settings.
    pub model: ModelSettings,
}

/// Settings for the reconstruction backend.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Registry key of the backend to load.
    pub backend: String,
    /// Directory holding model checkpoints and the mesh topology asset.
    pub checkpoint_dir: PathBuf,
    /// External inference command the default backend drives.
    pub inference_cmd: String,
    /// Detection confidence threshold.
    pub confidence_threshold: f32,
    /// Whether to request segmentation masks during inference.
    pub use_mask: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                       |
    /// |------------------------|-------------------------------|
    /// | `HOST`                 | `0.0.0.0`                     |
    /// | `PORT`                 | `8080`                        |
    /// | `CORS_ORIGINS`         | `*`                           |
    /// | `REQUEST_TIMEOUT_SECS` | `300`                         |
    /// | `OUTPUT_DIR`           | `output`                      |
    /// | `MAX_UPLOAD_BYTES`     | `524288000`                   |
    /// | `FRAME_CACHE_CAP`      | `50`                          |
    /// | `MODEL_BACKEND`        | `sam3d`                       |
    /// | `CHECKPOINT_DIR`       | `checkpoints/sam-3d-body`     |
    /// | `INFERENCE_CMD`        | `sam3d-body-infer`            |
    /// | `CONFIDENCE_THRESHOLD` | `0.8`                         |
    /// | `USE_MASK`             | `false`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let output_dir = PathBuf::from(std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "output".into()));

        let max_upload_bytes: u64 = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| "524288000".into())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid u64");

        let frame_cache_cap: usize = std::env::var("FRAME_CACHE_CAP")
            .unwrap_or_else(|_| "50".into())
            .parse()
            .expect("FRAME_CACHE_CAP must be a valid usize");

        let model = ModelSettings {
            backend: std::env::var("MODEL_BACKEND").unwrap_or_else(|_| SUBPROCESS_BACKEND.into()),
            checkpoint_dir: PathBuf::from(
                std::env::var("CHECKPOINT_DIR").unwrap_or_else(|_| "checkpoints/sam-3d-body".into()),
            ),
            inference_cmd: std::env::var("INFERENCE_CMD")
                .unwrap_or_else(|_| "sam3d-body-infer".into()),
            confidence_threshold: std::env::var("CONFIDENCE_THRESHOLD")
                .unwrap_or_else(|_| "0.8".into())
                .parse()
                .expect("CONFIDENCE_THRESHOLD must be a valid f32"),
            use_mask: std::env::var("USE_MASK")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        };

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            output_dir,
            max_upload_bytes,
            frame_cache_cap,
            model,
        }
    }

    /// Constructor arguments for the model registry.
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            backend: self.model.backend.clone(),
            checkpoint_dir: self.model.checkpoint_dir.clone(),
            inference_cmd: self.model.inference_cmd.clone(),
        }
    }

    /// Per-call inference knobs.
    pub fn inference_options(&self) -> InferenceOptions {
        InferenceOptions {
            confidence_threshold: self.model.confidence_threshold,
            use_mask: self.model.use_mask,
        }
    }
}
