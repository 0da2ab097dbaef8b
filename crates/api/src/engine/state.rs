//! Mutex-guarded state of the single job slot.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use mhr_core::error::CoreError;
use mhr_core::job::{JobPhase, JobStatus};
use mhr_core::progress::{video_percent, PERCENT_DONE, PERCENT_MODEL_READY};

/// The process-wide job record.
///
/// Created once at server start and reset by [`begin`](Self::begin) at each
/// job start. All mutations happen on the worker (plus the slot
/// reservation in `begin`); request handlers only take
/// [`snapshot`](Self::snapshot)s.
pub struct JobState {
    inner: Mutex<JobStatus>,
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

impl JobState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(JobStatus::idle()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobStatus> {
        self.inner.lock().expect("job state lock poisoned")
    }

    /// Consistent read-only copy for pollers.
    pub fn snapshot(&self) -> JobStatus {
        self.lock().clone()
    }

    /// Reserve the single job slot, resetting all fields for a new run.
    ///
    /// Rejected while a job is loading or running; terminal phases are
    /// overwritten.
    pub fn begin(&self, message: &str) -> Result<(), CoreError> {
        let mut status = self.lock();
        if status.phase.is_active() {
            return Err(CoreError::Conflict(
                "a job is already running; try again when it finishes".to_string(),
            ));
        }
        *status = JobStatus::started(message);
        Ok(())
    }

    pub fn set_message(&self, message: &str) {
        self.lock().message = message.to_string();
    }

    /// Raise the published percent. Never decreases: progress is
    /// monotonically non-decreasing within one job.
    pub fn set_progress(&self, percent: u8) {
        let mut status = self.lock();
        status.progress = status.progress.max(percent);
    }

    /// Model singleton is ready: enter `Running` at the reserved 10%.
    pub fn mark_model_ready(&self) {
        let mut status = self.lock();
        status.phase = JobPhase::Running;
        status.progress = status.progress.max(PERCENT_MODEL_READY);
    }

    /// Switch the record into video mode with the planned frame count.
    pub fn begin_video(&self, total_frames: u64) {
        let mut status = self.lock();
        status.is_video = true;
        status.total_frames = total_frames;
    }

    /// Publish progress after finishing planned position `position` (1-based)
    /// of `planned`.
    pub fn set_frame_progress(&self, position: u64, planned: usize, eta: Option<String>) {
        let mut status = self.lock();
        status.current_frame = position;
        status.message = format!("Processing frames... {position}/{planned}");
        let percent = video_percent(position.saturating_sub(1) as usize, planned);
        status.progress = status.progress.max(percent);
        if let Some(eta) = eta {
            status.eta = eta;
        }
    }

    /// Terminal success: publish the result location.
    pub fn complete(&self, result_path: &Path) {
        let mut status = self.lock();
        status.phase = JobPhase::Completed;
        status.running = false;
        status.progress = PERCENT_DONE;
        status.message = "Processing complete".to_string();
        status.eta = String::new();
        status.error = None;
        status.result_path = Some(result_path.display().to_string());
    }

    /// Terminal failure: record the error, clear any result, release the
    /// slot. Safe to call from the guaranteed-cleanup path regardless of
    /// which stage failed.
    pub fn fail(&self, message: String) {
        let mut status = self.lock();
        status.phase = JobPhase::Failed;
        status.running = false;
        status.message = message.clone();
        status.eta = String::new();
        status.error = Some(message);
        status.result_path = None;
    }
}
