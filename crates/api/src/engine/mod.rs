//! The single-flight job engine.
//!
//! [`JobState`] is the one record shared between the worker and request
//! handlers; [`JobHandle`] is the submission/status surface handlers see;
//! the runner owns the worker loop and every mutation of the state.

pub mod runner;
pub mod state;

pub use runner::{spawn, JobHandle, JobRequest};
pub use state::JobState;
