//! TuneVault backend entry point
//!
//! Wires configuration, the database, the job system, and the yt-dlp-backed
//! sync pipeline into an Axum server, and tears the job system down cleanly
//! on ctrl-c.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunevault::config::Config;
use tunevault::db::Database;
use tunevault::jobs::{JobEventBus, JobExecutor, JobStore, SyncScheduler};
use tunevault::services::{LibraryOrganizer, YtdlpClient};
use tunevault::sync::SyncPipeline;
use tunevault::{AppState, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunevault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting TuneVault backend");

    let db = Database::connect(&config.database_path).await?;

    let bus = Arc::new(JobEventBus::new());
    let store = Arc::new(JobStore::new(bus.clone()));

    let ytdlp = Arc::new(YtdlpClient::new(
        config.ytdlp_binary.clone(),
        config.audio_format.clone(),
        config.cookies_path.clone(),
    ));
    let organizer = Arc::new(LibraryOrganizer::new(config.library_path.clone()));
    let pipeline = Arc::new(SyncPipeline::new(
        ytdlp.clone(),
        ytdlp,
        organizer,
        config.downloads_path.clone(),
    ));
    let executor = Arc::new(JobExecutor::new(
        store.clone(),
        pipeline,
        config.downloads_path.clone(),
    ));
    let scheduler = Arc::new(SyncScheduler::new(db.clone(), executor.clone()));
    scheduler.start();

    let state = AppState {
        config: config.clone(),
        db,
        store,
        bus,
        executor: executor.clone(),
        scheduler: scheduler.clone(),
    };
    let app = build_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Stop the scheduler first so it cannot submit new jobs, then cancel
    // running work and wait for the tracked tasks to finish.
    scheduler.stop().await;
    let cancelled = executor.cancel_all();
    if cancelled > 0 {
        tracing::info!(cancelled, "Cancelled running jobs for shutdown");
    }
    executor.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}
