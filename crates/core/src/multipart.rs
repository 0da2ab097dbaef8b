//! `multipart/form-data` parsing as a pure function.
//!
//! The upload endpoint buffers the whole request body and hands it here
//! together with the boundary token from the `Content-Type` header. The
//! parser never streams: practical upload size is bounded by the caller's
//! `Content-Length` check *before* the body is read, not in here.

use std::collections::HashMap;

/// Name of the form field carrying the uploaded media file.
pub const FILE_FIELD: &str = "file";

/// Parse failure for a multipart body. All variants surface to the client
/// as a malformed-request error; the job is never started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultipartError {
    #[error("no boundary parameter in content type")]
    MissingBoundary,

    #[error("file part has no filename")]
    MissingFilename,

    #[error("no file part in request body")]
    MissingFile,
}

/// One decoded form part: a scalar text field or an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartValue {
    Text(String),
    File { file_name: String, bytes: Vec<u8> },
}

/// Decoded multipart form. Only the first occurrence of each field name is
/// retained.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    parts: HashMap<String, PartValue>,
}

impl FormData {
    /// Scalar value of a text field, if present.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.parts.get(name) {
            Some(PartValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    /// Filename and raw bytes of a file field, if present.
    pub fn file(&self, name: &str) -> Option<(&str, &[u8])> {
        match self.parts.get(name) {
            Some(PartValue::File { file_name, bytes }) => Some((file_name, bytes)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Extract the boundary token from a `Content-Type` header value.
///
/// Accepts both bare and quoted forms (`boundary=xyz`, `boundary="xyz"`).
pub fn boundary_from_content_type(content_type: &str) -> Result<&str, MultipartError> {
    for param in content_type.split(';') {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("boundary=") {
            let value = value.trim_matches('"');
            if !value.is_empty() {
                return Ok(value);
            }
        }
    }
    Err(MultipartError::MissingBoundary)
}

/// Decode a raw multipart body against a boundary token.
///
/// The body is split on the literal `--{boundary}` delimiter; each segment
/// is split into a header block and content at the first blank-line marker,
/// and trailing delimiter artifacts (CRLF and/or `--`) are stripped from the
/// content tail. Fails if the form has a `file` part without a filename, or
/// no file part at all.
pub fn parse(body: &[u8], boundary: &str) -> Result<FormData, MultipartError> {
    if boundary.is_empty() {
        return Err(MultipartError::MissingBoundary);
    }

    let delimiter = format!("--{boundary}");
    let mut parts: HashMap<String, PartValue> = HashMap::new();

    for segment in split_on(body, delimiter.as_bytes()) {
        let Some((header_block, content)) = split_once_on(segment, b"\r\n\r\n") else {
            continue;
        };
        // Lossy decode is fine: disposition names and filenames are ASCII in
        // practice, and the payload bytes are never routed through here.
        let headers = String::from_utf8_lossy(header_block);
        if !headers.contains("Content-Disposition") {
            continue;
        }
        let Some(name) = disposition_param(&headers, "name") else {
            continue;
        };
        if parts.contains_key(&name) {
            // First occurrence wins.
            continue;
        }

        let content = strip_delimiter_tail(content);
        match disposition_param(&headers, "filename") {
            Some(file_name) => {
                parts.insert(
                    name,
                    PartValue::File {
                        file_name,
                        bytes: content.to_vec(),
                    },
                );
            }
            None if name == FILE_FIELD => return Err(MultipartError::MissingFilename),
            None => {
                let value = String::from_utf8_lossy(content).trim().to_string();
                parts.insert(name, PartValue::Text(value));
            }
        }
    }

    if !matches!(parts.get(FILE_FIELD), Some(PartValue::File { .. })) {
        return Err(MultipartError::MissingFile);
    }

    Ok(FormData { parts })
}

/// Split `haystack` on every occurrence of `needle`.
fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut segments = Vec::new();
    let mut rest = haystack;
    while let Some(pos) = find(rest, needle) {
        segments.push(&rest[..pos]);
        rest = &rest[pos + needle.len()..];
    }
    segments.push(rest);
    segments
}

fn split_once_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Option<(&'a [u8], &'a [u8])> {
    let pos = find(haystack, needle)?;
    Some((&haystack[..pos], &haystack[pos + needle.len()..]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Strip the trailing CRLF and/or `--` left behind by the delimiter split.
fn strip_delimiter_tail(mut content: &[u8]) -> &[u8] {
    if let Some(stripped) = content.strip_suffix(b"\r\n") {
        content = stripped;
    }
    if let Some(stripped) = content.strip_suffix(b"--") {
        content = stripped;
    }
    if let Some(stripped) = content.strip_suffix(b"\r\n") {
        content = stripped;
    }
    content
}

/// Pull a quoted parameter value off the `Content-Disposition` header line.
fn disposition_param(headers: &str, key: &str) -> Option<String> {
    let line = headers
        .lines()
        .find(|l| l.trim_start().to_ascii_lowercase().starts_with("content-disposition:"))?;
    let prefix = format!("{key}=");
    for piece in line.split(';') {
        let piece = piece.trim();
        if let Some(value) = piece.strip_prefix(&prefix) {
            return Some(value.trim_matches('"').to_string());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
