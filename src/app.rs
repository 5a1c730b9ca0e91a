//! Application state and HTTP router construction.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Database;
use crate::jobs::{JobEventBus, JobExecutor, JobStore, SyncScheduler};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub store: Arc<JobStore>,
    pub bus: Arc<JobEventBus>,
    pub executor: Arc<JobExecutor>,
    pub scheduler: Arc<SyncScheduler>,
}

/// Build the full Axum router: /api routes, CORS, request tracing.
pub fn build_app(state: AppState) -> Router<()> {
    Router::new()
        .nest("/api", crate::api::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
