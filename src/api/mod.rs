//! REST API surface
//!
//! Each module contributes its own router; [`router`] merges them under the
//! `/api` prefix applied in [`crate::app::build_app`].

pub mod health;
pub mod jobs;
pub mod scheduler;
pub mod sync;

use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .merge(scheduler::router())
        .merge(sync::router())
}
