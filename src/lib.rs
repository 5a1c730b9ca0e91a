//! TuneVault: a self-hosted music sync backend
//!
//! Queues media-acquisition jobs (resolve → download → import), runs them one
//! at a time, streams progress over SSE, and re-syncs saved targets on an
//! interval.

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod jobs;
pub mod services;
pub mod sync;

pub use app::{AppState, build_app};
