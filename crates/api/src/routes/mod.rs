pub mod health;
pub mod results;
pub mod upload;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree consumed by the viewer.
///
/// ```text
/// POST /upload              -> accept a multipart upload, start the job
/// GET  /progress            -> job status document (no-cache)
/// GET  /mhr                 -> single-image result document, or {}
/// GET  /video_info          -> video manifest, or null
/// GET  /faces               -> shared triangle topology, or null
/// GET  /frame/{filename}    -> one per-frame document, faces backfilled
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload::upload))
        .route("/progress", get(results::progress))
        .route("/mhr", get(results::single_result))
        .route("/video_info", get(results::video_info))
        .route("/faces", get(results::shared_faces))
        .route("/frame/{filename}", get(results::frame))
}
