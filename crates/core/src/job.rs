//! The single in-flight job: state machine phases and the status snapshot
//! served to polling clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of the job slot.
///
/// Terminal phases (`Completed`, `Failed`) transition back through a fresh
/// start; only `Loading` and `Running` block a new submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Idle,
    Loading,
    Running,
    Completed,
    Failed,
}

impl JobPhase {
    /// Whether the slot is occupied by work in flight.
    pub fn is_active(self) -> bool {
        matches!(self, JobPhase::Loading | JobPhase::Running)
    }
}

/// Snapshot of the in-flight job, serialized verbatim on `/api/progress`.
///
/// Mutated exclusively by the worker; request handlers only ever read a
/// clone, so a poller can never observe a partially-updated record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub phase: JobPhase,
    pub running: bool,
    pub progress: u8,
    pub message: String,
    pub current_frame: u64,
    pub total_frames: u64,
    pub eta: String,
    pub error: Option<String>,
    pub result_path: Option<String>,
    pub is_video: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    /// The idle status a fresh process starts with.
    pub fn idle() -> Self {
        Self {
            phase: JobPhase::Idle,
            running: false,
            progress: 0,
            message: String::new(),
            current_frame: 0,
            total_frames: 0,
            eta: String::new(),
            error: None,
            result_path: None,
            is_video: false,
            started_at: None,
        }
    }

    /// Reset for a new run: everything cleared, phase `Loading`.
    pub fn started(message: impl Into<String>) -> Self {
        Self {
            phase: JobPhase::Loading,
            running: true,
            progress: 0,
            message: message.into(),
            current_frame: 0,
            total_frames: 0,
            eta: String::new(),
            error: None,
            result_path: None,
            is_video: false,
            started_at: Some(Utc::now()),
        }
    }
}
