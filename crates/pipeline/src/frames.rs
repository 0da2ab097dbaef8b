//! Frame sources: a single image or a sampled sweep over a video.
//!
//! Both modes yield [`Frame`]s ordered by increasing original index. A
//! source is not restartable; re-open it to iterate again.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::RgbImage;
use mhr_core::progress::planned_frame_indices;

use crate::ffmpeg::{
    self, extract_frame, parse_framerate, parse_resolution, parse_total_frames, FfmpegError,
};

/// Failure to open or decode media.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("unreadable media: {0}")]
    Unreadable(String),

    #[error(transparent)]
    Ffmpeg(#[from] FfmpegError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One unit of work: a decoded RGB frame plus its original index (0 for a
/// single image). The buffer dimensions are the wall-clock source size used
/// to denormalize camera intrinsics.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Decode a single image file into its one frame (index 0).
pub async fn load_image(path: &Path) -> Result<Frame, MediaError> {
    let bytes = tokio::fs::read(path).await?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| MediaError::Unreadable(format!("cannot decode image: {e}")))?;
    Ok(Frame {
        index: 0,
        image: decoded.to_rgb8(),
    })
}

/// Container-level metadata of an opened video.
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub fps: f64,
    pub total_frames: u64,
    pub width: u32,
    pub height: u32,
    pub frame_skip: u32,
}

/// A lazy, finite sequence of video frames.
///
/// `next_frame` yields one result per *planned* index: `Some(Ok(frame))`
/// when the index decoded, `Some(Err(_))` when it failed (the caller skips
/// it), `None` when the plan is exhausted.
#[async_trait]
pub trait FrameStream: Send {
    fn info(&self) -> &VideoInfo;

    /// Original frame indices the sweep will visit, in increasing order.
    fn planned(&self) -> &[u64];

    async fn next_frame(&mut self) -> Option<Result<Frame, MediaError>>;
}

/// ffmpeg-backed [`FrameStream`] over a video file on disk.
#[derive(Debug)]
pub struct VideoSource {
    path: PathBuf,
    info: VideoInfo,
    planned: Vec<u64>,
    cursor: usize,
}

impl VideoSource {
    /// Probe the container and lay out the planned index sweep.
    pub async fn open(path: &Path, frame_skip: u32) -> Result<Self, MediaError> {
        let probe = ffmpeg::probe_video(path).await?;

        let total_frames = parse_total_frames(&probe);
        if total_frames <= 0 {
            return Err(MediaError::Unreadable(format!(
                "no decodable video frames in {}",
                path.display()
            )));
        }
        let (width, height) = parse_resolution(&probe);
        if width <= 0 || height <= 0 {
            return Err(MediaError::Unreadable(format!(
                "no video stream resolution in {}",
                path.display()
            )));
        }

        let info = VideoInfo {
            fps: parse_framerate(&probe),
            total_frames: total_frames as u64,
            width: width as u32,
            height: height as u32,
            frame_skip,
        };
        let planned = planned_frame_indices(info.total_frames, frame_skip);

        Ok(Self {
            path: path.to_path_buf(),
            info,
            planned,
            cursor: 0,
        })
    }
}

#[async_trait]
impl FrameStream for VideoSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn planned(&self) -> &[u64] {
        &self.planned
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, MediaError>> {
        let index = *self.planned.get(self.cursor)?;
        self.cursor += 1;
        Some(
            extract_frame(&self.path, index)
                .await
                .map(|image| Frame { index, image })
                .map_err(MediaError::from),
        )
    }
}
