//! Scheduler status endpoint

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::AppState;
use crate::jobs::SchedulerStatus;

async fn status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/scheduler/status", get(status))
}
