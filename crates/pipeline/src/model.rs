//! The reconstruction model boundary.
//!
//! The ML itself (human detection, camera intrinsics estimation, body
//! reconstruction) is an external capability. This module defines the trait
//! the job engine consumes, a registry of named backends, and the default
//! backend that drives an external inference command the way the rest of
//! the pipeline drives ffmpeg.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use mhr_core::mhr::{FaceArray, PersonRecord};

use crate::frames::Frame;

/// Registry key of the default subprocess-driven backend.
pub const SUBPROCESS_BACKEND: &str = "sam3d";

/// Mesh topology asset expected inside the checkpoint directory.
pub const TOPOLOGY_FILE: &str = "mhr_topology.json";

/// Failure while constructing a model backend. Never cached: the next job
/// retries the load from scratch.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("unknown model backend: {0:?}")]
    UnknownBackend(String),

    #[error("checkpoint asset missing: {0}")]
    CheckpointMissing(String),

    #[error("invalid mesh topology: {0}")]
    Topology(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while reconstructing one frame. Distinct from an empty result
/// list, which means "no person detected" and is not an error.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference command not found: {0}")]
    NotFound(std::io::Error),

    #[error("inference failed (exit code {exit_code:?}): {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to encode frame: {0}")]
    Encode(String),

    #[error("failed to parse inference output: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-call inference knobs.
#[derive(Debug, Clone, Copy)]
pub struct InferenceOptions {
    pub confidence_threshold: f32,
    pub use_mask: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            use_mask: false,
        }
    }
}

/// One loaded reconstruction model. Read-only after construction and safe
/// to share across jobs without locking.
#[async_trait]
pub trait ReconstructionModel: Send + Sync {
    /// Run detection, intrinsics estimation, and reconstruction on one
    /// frame. An empty list is a valid "no person detected" outcome.
    async fn process(
        &self,
        frame: &Frame,
        opts: &InferenceOptions,
    ) -> Result<Vec<PersonRecord>, InferenceError>;

    /// Triangle topology shared by every mesh this model produces.
    fn faces(&self) -> &FaceArray;
}

/// Everything a backend constructor needs.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub backend: String,
    pub checkpoint_dir: PathBuf,
    pub inference_cmd: String,
}

type ModelBuilder =
    Box<dyn Fn(&ModelConfig) -> Result<Arc<dyn ReconstructionModel>, ModelLoadError> + Send + Sync>;

/// Maps backend keys to constructor closures.
///
/// New backends are added by registering a key, not by branching on name
/// strings at the call sites.
#[derive(Default)]
pub struct ModelRegistry {
    builders: HashMap<String, ModelBuilder>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SUBPROCESS_BACKEND, |config| SubprocessModel::load(config));
        registry
    }

    pub fn register<F>(&mut self, key: impl Into<String>, builder: F)
    where
        F: Fn(&ModelConfig) -> Result<Arc<dyn ReconstructionModel>, ModelLoadError>
            + Send
            + Sync
            + 'static,
    {
        self.builders.insert(key.into(), Box::new(builder));
    }

    /// Construct the backend named by `config.backend`.
    pub fn build(
        &self,
        config: &ModelConfig,
    ) -> Result<Arc<dyn ReconstructionModel>, ModelLoadError> {
        let builder = self
            .builders
            .get(&config.backend)
            .ok_or_else(|| ModelLoadError::UnknownBackend(config.backend.clone()))?;
        builder(config)
    }
}

// ---------------------------------------------------------------------------
// Subprocess backend
// ---------------------------------------------------------------------------

/// Default backend: writes the frame to a scratch PNG and runs the
/// configured external inference command, which prints one JSON array of
/// person records on stdout.
pub struct SubprocessModel {
    command: String,
    checkpoint_dir: PathBuf,
    faces: FaceArray,
}

impl SubprocessModel {
    /// Validate the checkpoint assets and load the shared mesh topology.
    pub fn load(config: &ModelConfig) -> Result<Arc<dyn ReconstructionModel>, ModelLoadError> {
        let topology_path = config.checkpoint_dir.join(TOPOLOGY_FILE);
        if !topology_path.exists() {
            return Err(ModelLoadError::CheckpointMissing(
                topology_path.display().to_string(),
            ));
        }

        let raw = std::fs::read(&topology_path)?;
        let faces: FaceArray = serde_json::from_slice(&raw)
            .map_err(|e| ModelLoadError::Topology(e.to_string()))?;
        if faces.is_empty() {
            return Err(ModelLoadError::Topology(
                "topology file contains no triangles".to_string(),
            ));
        }

        Ok(Arc::new(Self {
            command: config.inference_cmd.clone(),
            checkpoint_dir: config.checkpoint_dir.clone(),
            faces,
        }))
    }
}

#[async_trait]
impl ReconstructionModel for SubprocessModel {
    async fn process(
        &self,
        frame: &Frame,
        opts: &InferenceOptions,
    ) -> Result<Vec<PersonRecord>, InferenceError> {
        // Hand the frame over as a file: the inference tooling takes image
        // paths, not pixel streams.
        let scratch = std::env::temp_dir().join(format!("mhr-frame-{}.png", uuid::Uuid::new_v4()));
        let mut png = Vec::new();
        frame
            .image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| InferenceError::Encode(e.to_string()))?;
        tokio::fs::write(&scratch, &png).await?;

        let mut command = tokio::process::Command::new(&self.command);
        command
            .arg("--image")
            .arg(&scratch)
            .arg("--checkpoint-dir")
            .arg(&self.checkpoint_dir)
            .arg("--confidence")
            .arg(opts.confidence_threshold.to_string());
        if opts.use_mask {
            command.arg("--use-mask");
        }

        let output = command.output().await;
        let _ = tokio::fs::remove_file(&scratch).await;

        let output = output.map_err(InferenceError::NotFound)?;
        if !output.status.success() {
            return Err(InferenceError::Failed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str::<Vec<PersonRecord>>(&stdout)
            .map_err(|e| InferenceError::Parse(e.to_string()))
    }

    fn faces(&self) -> &FaceArray {
        &self.faces
    }
}
