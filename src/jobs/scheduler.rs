//! Interval scheduler for sync targets
//!
//! The loop waits a full interval before its first pass, then submits a job
//! per enabled target. The interval and the enabled flag are re-read from
//! the database at the top of every cycle, so config changes apply without a
//! restart (at the latest after the current wait elapses).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{Database, SyncConfigRecord};
use crate::jobs::executor::JobExecutor;
use crate::jobs::store::{JobError, JobKind};

/// Snapshot of the scheduler for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub enabled: bool,
    pub interval_minutes: i64,
    pub next_run_at: Option<DateTime<Utc>>,
    pub targets: TargetCounts,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TargetCounts {
    pub total: usize,
    pub enabled: usize,
}

struct LoopHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SyncScheduler {
    db: Database,
    executor: Arc<JobExecutor>,
    inner: Mutex<Option<LoopHandle>>,
    next_run_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl SyncScheduler {
    pub fn new(db: Database, executor: Arc<JobExecutor>) -> Self {
        Self {
            db,
            executor,
            inner: Mutex::new(None),
            next_run_at: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the interval loop. A second call while it runs is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if inner.as_ref().is_some_and(|h| !h.handle.is_finished()) {
            warn!("Sync scheduler already running");
            return;
        }
        let token = CancellationToken::new();
        let scheduler = self.clone();
        let handle = tokio::spawn(scheduler.run_loop(token.clone()));
        *inner = Some(LoopHandle { token, handle });
        info!("Sync scheduler started");
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        loop {
            let config = match self.db.sync_targets().get_config().await {
                Ok(config) => config,
                Err(e) => {
                    warn!(error = %e, "Failed to read sync config; using defaults");
                    SyncConfigRecord::default()
                }
            };
            let interval_minutes = config.interval_minutes.max(1);
            let wait = Duration::from_secs(interval_minutes as u64 * 60);
            *self.next_run_at.lock() = Some(Utc::now() + TimeDelta::minutes(interval_minutes));

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            if config.enabled {
                let job_ids = self.sync_all_enabled().await;
                if !job_ids.is_empty() {
                    info!(jobs = job_ids.len(), "Scheduled sync pass created jobs");
                }
            }
        }
        *self.next_run_at.lock() = None;
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(&self) {
        let taken = self.inner.lock().take();
        if let Some(LoopHandle { token, handle }) = taken {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler loop ended abnormally");
            }
            info!("Sync scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .lock()
            .as_ref()
            .is_some_and(|h| !h.handle.is_finished())
    }

    /// Submit a sync job for every enabled target, now. Used by the interval
    /// loop and the manual "sync now" endpoint.
    pub async fn sync_all_enabled(&self) -> Vec<Uuid> {
        let targets = match self.db.sync_targets().list_enabled().await {
            Ok(targets) => targets,
            Err(e) => {
                error!(error = %e, "Failed to list sync targets");
                return Vec::new();
            }
        };

        let mut job_ids = Vec::new();
        let now = Utc::now();
        for target in targets {
            match self.executor.submit(&target.url, JobKind::detect(&target.url)) {
                Ok(job) => {
                    if let Err(e) = self
                        .db
                        .sync_targets()
                        .record_sync(target.id, job.id, now)
                        .await
                    {
                        warn!(target = %target.name, error = %e, "Failed to record sync");
                    }
                    job_ids.push(job.id);
                }
                Err(JobError::QueueFull) => {
                    warn!(target = %target.name, "Job queue full; skipping remaining targets");
                    break;
                }
                Err(e) => warn!(target = %target.name, error = %e, "Failed to submit sync job"),
            }
        }
        job_ids
    }

    pub async fn status(&self) -> SchedulerStatus {
        let config = self
            .db
            .sync_targets()
            .get_config()
            .await
            .unwrap_or_default();
        let targets = self.db.sync_targets().list().await.unwrap_or_default();
        let enabled_count = targets.iter().filter(|t| t.enabled).count();

        SchedulerStatus {
            running: self.is_running(),
            enabled: config.enabled,
            interval_minutes: config.interval_minutes,
            next_run_at: *self.next_run_at.lock(),
            targets: TargetCounts {
                total: targets.len(),
                enabled: enabled_count,
            },
        }
    }
}
