//! Disk layout of uploads and results.
//!
//! Single images persist as `{root}/{stem}.mhr.json` with faces embedded.
//! Videos persist as a directory `{root}/{video_name}/` holding one
//! `frame_{idx:06}.mhr.json` per processed frame, the shared `faces.json`,
//! and the `video_info.json` manifest. Only the first successful frame
//! document embeds the topology; later documents carry `faces: null` and
//! readers resolve them against the shared copy.

use std::path::{Path, PathBuf};

use mhr_core::mhr::{
    frame_file_name, FaceArray, ResultDocument, VideoManifest, FACES_FILE, MANIFEST_FILE,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid result document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Suffix every per-frame and single-image result document carries.
pub const RESULT_SUFFIX: &str = ".mhr.json";

/// Whether a client-supplied frame file name may be joined onto a result
/// directory: plain basename, correct suffix, no path tricks.
pub fn is_safe_frame_file_name(name: &str) -> bool {
    !name.is_empty()
        && name.ends_with(RESULT_SUFFIX)
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}

/// Reader/writer for the result tree rooted at the configured output
/// directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory raw uploads are staged into before processing.
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// Result directory for one video job.
    pub fn video_dir(&self, video_name: &str) -> PathBuf {
        self.root.join(video_name)
    }

    /// Persist the raw uploaded bytes; the job reads from this path, not
    /// from the request body.
    pub async fn save_upload(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let dir = self.uploads_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(file_name);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Write a single-image result document (faces embedded).
    pub async fn save_single(
        &self,
        stem: &str,
        document: &ResultDocument,
    ) -> Result<PathBuf, StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(format!("{stem}{RESULT_SUFFIX}"));
        tokio::fs::write(&path, serde_json::to_vec(document)?).await?;
        Ok(path)
    }

    /// Write one per-frame result document, returning its file name.
    pub async fn save_frame(
        &self,
        dir: &Path,
        frame_idx: u64,
        document: &ResultDocument,
    ) -> Result<String, StoreError> {
        tokio::fs::create_dir_all(dir).await?;
        let file = frame_file_name(frame_idx);
        tokio::fs::write(dir.join(&file), serde_json::to_vec(document)?).await?;
        Ok(file)
    }

    /// Write the shared topology document for a video job.
    pub async fn save_shared_faces(&self, dir: &Path, faces: &FaceArray) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join(FACES_FILE), serde_json::to_vec(faces)?).await?;
        Ok(())
    }

    /// Write the manifest. Called once after the full sweep: a client
    /// polling mid-job must rely on progress, not manifest presence.
    pub async fn save_manifest(
        &self,
        dir: &Path,
        manifest: &VideoManifest,
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(manifest)?,
        )
        .await?;
        Ok(())
    }

    /// Read a result document from an absolute path.
    pub async fn load_document(&self, path: &Path) -> Result<ResultDocument, StoreError> {
        let raw = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Read a video manifest; `None` if it has not been written yet.
    pub async fn load_manifest(&self, dir: &Path) -> Result<Option<VideoManifest>, StoreError> {
        match tokio::fs::read(dir.join(MANIFEST_FILE)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the shared faces array; `None` if absent.
    pub async fn load_faces(&self, dir: &Path) -> Result<Option<FaceArray>, StoreError> {
        match tokio::fs::read(dir.join(FACES_FILE)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read one per-frame document by file name; `None` if absent.
    pub async fn load_frame(
        &self,
        dir: &Path,
        file_name: &str,
    ) -> Result<Option<ResultDocument>, StoreError> {
        match tokio::fs::read(dir.join(file_name)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read one per-frame document and backfill a `faces: null` field from
    /// the shared faces document, so the returned document is always
    /// self-contained.
    pub async fn load_frame_with_faces(
        &self,
        dir: &Path,
        file_name: &str,
    ) -> Result<Option<ResultDocument>, StoreError> {
        let Some(mut document) = self.load_frame(dir, file_name).await? else {
            return Ok(None);
        };
        if document.faces.is_none() {
            document.faces = self.load_faces(dir).await?;
        }
        Ok(Some(document))
    }
}
