use std::sync::Arc;

use mhr_pipeline::store::ResultStore;

use crate::cache::FrameCache;
use crate::config::ServerConfig;
use crate::engine::JobHandle;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Handle to the single-flight job engine (submit + status snapshots).
    pub jobs: Arc<JobHandle>,
    /// Result tree reader/writer.
    pub store: Arc<ResultStore>,
    /// Bounded cache of per-frame result documents.
    pub frame_cache: Arc<FrameCache>,
}
