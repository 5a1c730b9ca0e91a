//! Job executor: runs admitted jobs one at a time
//!
//! The executor owns the cancel-token registry and the tracked task set. Each
//! admitted job runs as its own tracked task; the work itself runs inside a
//! further spawn so a panic surfaces as a [`JoinError`] and is converted to a
//! failed job instead of wedging the queue. When a run ends, for any reason,
//! the same cleanup path releases the active slot and chains the next
//! pending job.
//!
//! [`JoinError`]: tokio::task::JoinError

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::jobs::store::{
    EnqueueOutcome, Job, JobError, JobKind, JobStatus, JobStore, TransitionFields,
};
use crate::services::cleanup_partial_files;
use crate::sync::{ProgressEvent, ProgressStep, SyncPipeline};

pub struct JobExecutor {
    store: Arc<JobStore>,
    pipeline: Arc<SyncPipeline>,
    downloads_dir: PathBuf,
    tracker: TaskTracker,
    cancel_tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl JobExecutor {
    pub fn new(store: Arc<JobStore>, pipeline: Arc<SyncPipeline>, downloads_dir: PathBuf) -> Self {
        Self {
            store,
            pipeline,
            downloads_dir,
            tracker: TaskTracker::new(),
            cancel_tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Enqueue a URL and start it if it was admitted. A job that has to wait
    /// gets a metadata prefetch so the UI can show what is queued.
    pub fn submit(self: &Arc<Self>, url: &str, kind: JobKind) -> Result<Job, JobError> {
        match self.store.enqueue(url, kind)? {
            EnqueueOutcome::Admitted(job) => {
                info!(job_id = %job.id, url, "Job admitted; starting");
                self.start(job.clone());
                Ok(job)
            }
            EnqueueOutcome::Queued(job) => {
                debug!(job_id = %job.id, url, "Job queued behind the active job");
                self.spawn_metadata_prefetch(job.clone());
                Ok(job)
            }
        }
    }

    /// Spawn the tracked task for a job that holds the active slot.
    fn start(self: &Arc<Self>, job: Job) {
        let executor = self.clone();
        self.tracker.spawn(executor.run_job(job));
    }

    async fn run_job(self: Arc<Self>, job: Job) {
        let job_id = job.id;
        let cancel = CancellationToken::new();
        self.cancel_tokens.lock().insert(job_id, cancel.clone());

        // The work runs in its own task so a panic becomes a JoinError here
        // rather than taking this supervisor down with it.
        let work = tokio::spawn(Self::execute(
            self.store.clone(),
            self.pipeline.clone(),
            job,
            cancel.clone(),
        ));
        if let Err(e) = work.await {
            error!(job_id = %job_id, error = %e, "Job task aborted");
            let _ = self.store.transition(
                job_id,
                JobStatus::Failed,
                TransitionFields {
                    error: Some("Internal error during job execution".to_string()),
                    ..Default::default()
                },
            );
        }

        if cancel.is_cancelled() {
            let removed = cleanup_partial_files(&self.downloads_dir);
            if removed > 0 {
                info!(job_id = %job_id, removed, "Removed partial downloads after cancellation");
            }
        }
        // The per-job working directory is no longer needed; imported tracks
        // already moved into the library.
        let _ = tokio::fs::remove_dir_all(self.pipeline.job_dir(job_id)).await;

        self.cancel_tokens.lock().remove(&job_id);
        self.store.release_active(job_id);
        if let Some(next) = self.store.pop_next_pending() {
            info!(job_id = %next.id, "Starting next pending job");
            self.start(next);
        }
    }

    async fn execute(
        store: Arc<JobStore>,
        pipeline: Arc<SyncPipeline>,
        job: Job,
        cancel: CancellationToken,
    ) {
        let job_id = job.id;
        if cancel.is_cancelled() {
            return;
        }
        if store
            .transition(job_id, JobStatus::FetchingInfo, TransitionFields::default())
            .is_err()
        {
            // Cancelled or deleted before it could start.
            return;
        }

        // Relay pipeline progress into store transitions. Terminal steps are
        // skipped; only this function writes the final status, after the
        // relay has drained, so no progress event can trail it.
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let relay = {
            let store = store.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while let Some(event) = progress_rx.recv().await {
                    if cancel.is_cancelled() {
                        continue;
                    }
                    let Some(status) = step_status(event.step) else {
                        continue;
                    };
                    let fields = TransitionFields {
                        progress: event.progress,
                        message: Some(event.message),
                        content_info: event.content_info,
                        ..Default::default()
                    };
                    if let Err(e) = store.transition(job_id, status, fields) {
                        debug!(job_id = %job_id, error = %e, "Dropped progress update");
                    }
                }
            })
        };

        let outcome = pipeline.run(&job, progress_tx, cancel.clone()).await;
        let _ = relay.await;

        if cancel.is_cancelled() {
            // The cancel path already wrote the final status.
            return;
        }
        if outcome.success {
            let partial = !outcome.errors.is_empty();
            let _ = store.transition(
                job_id,
                JobStatus::Completed,
                TransitionFields {
                    progress: Some(100.0),
                    message: Some("Sync complete".to_string()),
                    content_info: outcome.content_info.clone(),
                    error: partial.then(|| outcome.error_summary()),
                    stats: Some(outcome.stats),
                },
            );
            info!(job_id = %job_id, tracks = outcome.stats.tracks_downloaded, "Job completed");
        } else {
            let error = outcome.error_summary();
            warn!(job_id = %job_id, error = %error, "Job failed");
            let _ = store.transition(
                job_id,
                JobStatus::Failed,
                TransitionFields {
                    message: Some("Sync failed".to_string()),
                    error: Some(error),
                    stats: Some(outcome.stats),
                    ..Default::default()
                },
            );
        }
    }

    /// Resolve metadata for a queued job in the background and attach it,
    /// unless the job started in the meantime.
    fn spawn_metadata_prefetch(self: &Arc<Self>, job: Job) {
        let executor = self.clone();
        self.tracker.spawn(async move {
            match executor.pipeline.resolver().resolve(&job.url, job.kind).await {
                Ok(info) => match executor.store.backfill_content_info(job.id, info) {
                    Ok(true) => debug!(job_id = %job.id, "Prefetched content info"),
                    Ok(false) => debug!(job_id = %job.id, "Prefetch arrived late; dropped"),
                    Err(e) => debug!(job_id = %job.id, error = %e, "Prefetch target gone"),
                },
                Err(e) => debug!(job_id = %job.id, error = %e, "Metadata prefetch failed"),
            }
        });
    }

    /// Signal a running job's cancel token. Returns whether a token existed;
    /// the caller decides what to do with jobs that have none.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.cancel_tokens.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running job. Returns how many tokens were signalled.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.cancel_tokens.lock();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Stop accepting work and wait for in-flight tasks to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Map a non-terminal pipeline step onto the job status it implies.
fn step_status(step: ProgressStep) -> Option<JobStatus> {
    match step {
        ProgressStep::FetchingInfo => Some(JobStatus::FetchingInfo),
        ProgressStep::Downloading => Some(JobStatus::Downloading),
        ProgressStep::Importing => Some(JobStatus::Importing),
        ProgressStep::Completed | ProgressStep::Failed => None,
    }
}
