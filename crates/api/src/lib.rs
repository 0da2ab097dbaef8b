//! MHR API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes, the
//! job engine) so integration tests and the binary entrypoint share them.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod router;
pub mod routes;
pub mod state;
