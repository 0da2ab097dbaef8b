//! The upload endpoint: multipart decode, staging, job admission.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::HeaderMap;
use axum::Json;
use mhr_core::error::CoreError;
use mhr_core::media::{sanitize_file_name, MediaKind};
use mhr_core::multipart::{self, FILE_FIELD};
use serde_json::{json, Value};

use crate::engine::JobRequest;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /api/upload
///
/// Multipart body with a required `file` part and an optional `frame_skip`
/// field. The raw upload is staged under the output directory and the job
/// engine takes over; the response only acknowledges admission. A second
/// upload while a job is active is rejected with 409.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    // Size gate on the declared length: the parser buffers the whole body,
    // so the cap is enforced here at the boundary.
    if let Some(declared) = content_length(&headers) {
        if declared > state.config.max_upload_bytes {
            return Err(AppError::PayloadTooLarge(declared));
        }
    }
    if body.len() as u64 > state.config.max_upload_bytes {
        return Err(AppError::PayloadTooLarge(body.len() as u64));
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::Core(CoreError::MalformedRequest(
                "missing content type header".to_string(),
            ))
        })?;

    let boundary = multipart::boundary_from_content_type(content_type)?;
    let form = multipart::parse(&body, boundary)?;

    let (raw_name, file_bytes) = form
        .file(FILE_FIELD)
        .ok_or_else(|| AppError::InternalError("file part vanished after parse".to_string()))?;

    // Reject unsupported media before anything touches disk.
    let kind = MediaKind::classify(raw_name)?;

    // An unparseable frame_skip falls back to 0 rather than failing the
    // upload.
    let frame_skip: u32 = form
        .text("frame_skip")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    let file_name = sanitize_file_name(raw_name);
    let upload_path = state.store.save_upload(&file_name, file_bytes).await?;
    tracing::info!(
        file = %file_name,
        bytes = file_bytes.len(),
        kind = ?kind,
        frame_skip,
        "Upload staged",
    );

    let submitted = state.jobs.submit(JobRequest {
        upload_path: upload_path.clone(),
        file_name,
        kind,
        frame_skip,
    });
    if let Err(err) = submitted {
        // Busy (or a dead worker): the staged file will never be read.
        let _ = tokio::fs::remove_file(&upload_path).await;
        return Err(err.into());
    }

    // Results from the previous job are about to be replaced.
    state.frame_cache.clear();

    Ok(Json(json!({ "status": "processing" })))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
}
