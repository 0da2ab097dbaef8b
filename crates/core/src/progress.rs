//! Frame planning and progress/ETA accounting.
//!
//! Percent values are published to polling clients, so everything here is
//! careful to stay monotonically non-decreasing over the life of one job
//! and to end at exactly 100 on success.

// ---------------------------------------------------------------------------
// Progress checkpoints
// ---------------------------------------------------------------------------

/// Percent reported once the model singleton is ready. The leading 10% of
/// every job is reserved for model loading.
pub const PERCENT_MODEL_READY: u8 = 10;
/// Image mode: source image decoded.
pub const PERCENT_IMAGE_DECODED: u8 = 30;
/// Image mode: inference finished.
pub const PERCENT_IMAGE_INFERRED: u8 = 80;
/// Terminal percent on success.
pub const PERCENT_DONE: u8 = 100;

/// Seconds below which the ETA is formatted as seconds rather than minutes.
const ETA_MINUTE_THRESHOLD: f64 = 60.0;

// ---------------------------------------------------------------------------
// Frame planning
// ---------------------------------------------------------------------------

/// Original frame indices a video sweep will visit.
///
/// With `frame_skip = k` the stride is `k + 1`, so the planned set is
/// `{0, k+1, 2(k+1), ...}` up to (but excluding) `total_frames`. Progress
/// accounting is based on the cardinality of this set, not on how many
/// frames later decode successfully.
pub fn planned_frame_indices(total_frames: u64, frame_skip: u32) -> Vec<u64> {
    let stride = u64::from(frame_skip) + 1;
    (0..total_frames).step_by(stride as usize).collect()
}

/// Percent for a video job after finishing planned position `position`
/// (0-based index into the planned sequence) out of `planned` total.
pub fn video_percent(position: usize, planned: usize) -> u8 {
    if planned == 0 {
        return PERCENT_DONE;
    }
    let span = u64::from(PERCENT_DONE - PERCENT_MODEL_READY);
    PERCENT_MODEL_READY + (span * (position as u64 + 1) / planned as u64) as u8
}

// ---------------------------------------------------------------------------
// ETA
// ---------------------------------------------------------------------------

/// Running mean of per-frame wall-clock processing time.
///
/// Remaining time is `mean * remaining_frames`; only frames that actually
/// reached inference are recorded, so undecodable frames do not drag the
/// average down.
#[derive(Debug, Default, Clone)]
pub struct EtaTracker {
    total_secs: f64,
    samples: u32,
}

impl EtaTracker {
    pub fn record(&mut self, frame_secs: f64) {
        self.total_secs += frame_secs;
        self.samples += 1;
    }

    /// Estimated seconds left for `remaining_frames` planned frames.
    /// `None` until at least one frame has been timed.
    pub fn remaining_secs(&self, remaining_frames: usize) -> Option<f64> {
        if self.samples == 0 {
            return None;
        }
        let mean = self.total_secs / f64::from(self.samples);
        Some(mean * remaining_frames as f64)
    }

    /// Human-readable ETA for `remaining_frames` planned frames.
    pub fn remaining_label(&self, remaining_frames: usize) -> Option<String> {
        self.remaining_secs(remaining_frames).map(format_eta)
    }
}

/// Format a duration estimate: whole seconds below one minute, fractional
/// minutes otherwise.
pub fn format_eta(secs: f64) -> String {
    if secs < ETA_MINUTE_THRESHOLD {
        format!("{secs:.0}s")
    } else {
        format!("{:.1}min", secs / ETA_MINUTE_THRESHOLD)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
