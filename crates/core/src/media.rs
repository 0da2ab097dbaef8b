//! Media classification by file extension.

use crate::error::CoreError;

/// Image extensions the pipeline accepts.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Video extensions the pipeline accepts.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

/// Kind of media an upload resolves to, deciding the processing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a filename by its extension, rejecting anything outside the
    /// allowed sets before any processing starts.
    pub fn classify(file_name: &str) -> Result<Self, CoreError> {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Ok(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Ok(MediaKind::Video)
        } else {
            Err(CoreError::UnsupportedMediaType(format!(
                "unsupported file extension: {file_name:?}"
            )))
        }
    }
}

/// Reduce a client-supplied filename to a safe basename for disk storage.
///
/// Strips any path components (both separators) so an upload can never
/// escape the uploads directory.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        "upload.bin".to_string()
    } else {
        base.to_string()
    }
}

/// Filename stem used to name a single-image result document.
pub fn file_stem(file_name: &str) -> &str {
    file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(file_name)
}
