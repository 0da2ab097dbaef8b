//! Read-side endpoints polled by the viewer.
//!
//! Everything here is served with `Cache-Control: no-cache` so a polling
//! client always sees near-real-time state.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mhr_core::error::CoreError;
use mhr_pipeline::store::is_safe_frame_file_name;
use serde_json::json;

use crate::error::AppResult;
use crate::state::AppState;

fn no_cache(inner: impl IntoResponse) -> Response {
    ([(header::CACHE_CONTROL, "no-cache")], inner).into_response()
}

/// GET /api/progress
///
/// The full job status document, verbatim.
pub async fn progress(State(state): State<AppState>) -> Response {
    no_cache(Json(state.jobs.status()))
}

/// GET /api/mhr
///
/// The single-image result document, or `{}` while there is none.
pub async fn single_result(State(state): State<AppState>) -> AppResult<Response> {
    let status = state.jobs.status();
    if let (Some(result_path), false) = (&status.result_path, status.is_video) {
        let document = state.store.load_document(FsPath::new(result_path)).await?;
        return Ok(no_cache(Json(document)));
    }
    Ok(no_cache(Json(json!({}))))
}

/// GET /api/video_info
///
/// The video manifest, or `null` while there is none.
pub async fn video_info(State(state): State<AppState>) -> AppResult<Response> {
    let status = state.jobs.status();
    if let (Some(result_path), true) = (&status.result_path, status.is_video) {
        let manifest = state.store.load_manifest(FsPath::new(result_path)).await?;
        return Ok(no_cache(Json(manifest)));
    }
    Ok(no_cache(Json(serde_json::Value::Null)))
}

/// GET /api/faces
///
/// The shared triangle topology, or `null` while there is none.
pub async fn shared_faces(State(state): State<AppState>) -> AppResult<Response> {
    let status = state.jobs.status();
    if let (Some(result_path), true) = (&status.result_path, status.is_video) {
        let faces = state.store.load_faces(FsPath::new(result_path)).await?;
        return Ok(no_cache(Json(faces)));
    }
    Ok(no_cache(Json(serde_json::Value::Null)))
}

/// GET /api/frame/{filename}
///
/// One per-frame result document. A `faces: null` document is backfilled
/// from the shared topology so every response is self-contained.
pub async fn frame(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> AppResult<Response> {
    if !is_safe_frame_file_name(&file_name) {
        return Err(CoreError::NotFound {
            entity: "Frame",
            name: file_name,
        }
        .into());
    }

    let status = state.jobs.status();
    let (Some(result_path), true) = (&status.result_path, status.is_video) else {
        return Err(CoreError::NotFound {
            entity: "Frame",
            name: file_name,
        }
        .into());
    };

    if let Some(document) = state.frame_cache.get(&file_name) {
        return Ok(no_cache(Json(&*document)));
    }

    let Some(document) = state
        .store
        .load_frame_with_faces(FsPath::new(result_path), &file_name)
        .await?
    else {
        return Err(CoreError::NotFound {
            entity: "Frame",
            name: file_name,
        }
        .into());
    };

    // Cache the backfilled document: replays of the same frame skip both
    // the disk read and the faces lookup.
    let document = Arc::new(document);
    state
        .frame_cache
        .insert(file_name, Arc::clone(&document));
    Ok(no_cache(Json(&*document)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
