//! The MHR result document model.
//!
//! One [`ResultDocument`] describes every person reconstructed from one
//! image or one video frame. The triangle topology (`faces`) is identical
//! for every mesh a model produces, so a video job persists it physically
//! once — inline in the first successful frame document and mirrored to a
//! shared `faces.json` — and every later document carries `faces: null`
//! for the reader to resolve against the shared copy.
//!
//! Optional numeric blocks serialize as `null`, never get omitted:
//! consumers rely on key presence.

use serde::{Deserialize, Serialize};

/// Document format version.
pub const MHR_VERSION: &str = "1.0";

/// Shared faces document inside a video result directory.
pub const FACES_FILE: &str = "faces.json";

/// Manifest document inside a video result directory.
pub const MANIFEST_FILE: &str = "video_info.json";

/// Triangle index array (F x 3), shared by all meshes of one model.
pub type FaceArray = Vec<[u32; 3]>;

/// Deterministic per-frame result file name, keyed by the original frame
/// index (not the position in the planned sequence).
pub fn frame_file_name(frame_idx: u64) -> String {
    format!("frame_{frame_idx:06}.mhr.json")
}

/// One detected person within a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: usize,
    /// Bounding box as `[x0, y0, x1, y1]`.
    pub bbox: Option<Vec<f32>>,
    pub focal_length: f32,
    pub camera: CameraParams,
    pub mesh: MeshData,
    pub params: PoseParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    pub translation: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub vertices: Option<Vec<[f32; 3]>>,
    pub keypoints_3d: Option<Vec<[f32; 3]>>,
    pub keypoints_2d: Option<Vec<[f32; 2]>>,
}

/// Pose parameter blocks. Each block is a flat float array whose length is
/// model-defined; a block the model did not emit stays `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseParams {
    pub global_rot: Option<Vec<f32>>,
    pub body_pose: Option<Vec<f32>>,
    pub shape: Option<Vec<f32>>,
    pub scale: Option<Vec<f32>>,
    pub hand: Option<Vec<f32>>,
    pub expression: Option<Vec<f32>>,
}

/// The persisted/transmitted unit: all people of one image or frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub version: String,
    pub image_path: String,
    /// Source size as `[width, height]`, needed to denormalize intrinsics.
    pub image_size: [u32; 2],
    pub num_people: usize,
    pub faces: Option<FaceArray>,
    pub people: Vec<PersonRecord>,
}

impl ResultDocument {
    pub fn new(
        image_path: impl Into<String>,
        image_size: [u32; 2],
        people: Vec<PersonRecord>,
        faces: Option<FaceArray>,
    ) -> Self {
        Self {
            version: MHR_VERSION.to_string(),
            image_path: image_path.into(),
            image_size,
            num_people: people.len(),
            faces,
            people,
        }
    }
}

/// Entry in the video manifest for one successfully processed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedFrame {
    pub frame_idx: u64,
    pub file: String,
    pub num_people: usize,
}

/// Index of a video job's output, written once after the full sweep. The
/// viewer drives playback off `processed_frames`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoManifest {
    pub video_path: String,
    pub video_name: String,
    pub fps: f64,
    pub total_frames: u64,
    pub width: u32,
    pub height: u32,
    pub frame_skip: u32,
    pub processed_frames: Vec<ProcessedFrame>,
}
