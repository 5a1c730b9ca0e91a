//! In-memory job registry and lifecycle state machine
//!
//! The store is the single source of truth for jobs. Reads and writes take
//! one lock covering the whole logical operation, so admission checks and
//! mutations can never interleave. Nothing in here awaits; callers may use
//! the store from any task without holding it across a suspension point.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::jobs::event_bus::{JobEvent, JobEventBus};

/// Error message set on jobs that exceed the active-phase ceiling.
pub const TIMEOUT_ERROR: &str = "Job timed out after 30 minutes";

/// What kind of content a job acquires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// One track.
    Single,
    /// A playlist or album.
    Playlist,
    /// Every release of an artist, processed sequentially in one job.
    Discography,
}

impl JobKind {
    /// Best-effort kind detection from a source URL, used when the caller
    /// does not specify one. A `list` query parameter means playlist/album;
    /// an artist channel path means discography.
    pub fn detect(url: &str) -> Self {
        let Ok(parsed) = Url::parse(url) else {
            return Self::Single;
        };
        let path = parsed.path();
        if path.starts_with("/channel/") || path.starts_with("/browse/UC") {
            return Self::Discography;
        }
        if parsed.query_pairs().any(|(k, _)| k == "list") {
            return Self::Playlist;
        }
        Self::Single
    }
}

/// Job lifecycle states.
///
/// `Pending → FetchingInfo → Downloading → Importing → {Completed | Failed}`,
/// with `Cancelled` reachable from any non-terminal state. Terminal states
/// never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    FetchingInfo,
    Downloading,
    Importing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Resolved description of what a job is downloading. Filled in once the
/// metadata phase (or the prefetch) has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentInfo {
    pub title: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_count: Option<u32>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Accumulated result statistics for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub tracks_downloaded: u32,
    pub tracks_failed: u32,
    pub releases_completed: u32,
    pub releases_total: u32,
}

/// A tracked unit of download+organize work.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub url: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: f64,
    pub message: String,
    pub content_info: Option<ContentInfo>,
    pub error: Option<String>,
    pub stats: Option<SyncStats>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    fn new(url: String, kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            kind,
            status: JobStatus::Pending,
            progress: 0.0,
            message: String::new(),
            content_info: None,
            error: None,
            stats: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Store-level failures, surfaced directly to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Capacity reached and every tracked job is still pending or running.
    #[error("job queue is full")]
    QueueFull,
    #[error("job not found")]
    NotFound,
    /// The job already reached a terminal status.
    #[error("job already finished")]
    AlreadyFinished,
    /// The operation requires a terminal job (delete) or a pending one (cancel).
    #[error("job is still queued or running")]
    NotFinished,
}

/// Result of [`JobStore::enqueue`].
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// No job was active; this one holds the active slot and should be
    /// started immediately.
    Admitted(Job),
    /// Another job is active; this one waits in FIFO order.
    Queued(Job),
}

impl EnqueueOutcome {
    pub fn job(&self) -> &Job {
        match self {
            Self::Admitted(job) | Self::Queued(job) => job,
        }
    }
}

/// Optional field updates applied by [`JobStore::transition`].
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub content_info: Option<ContentInfo>,
    pub error: Option<String>,
    pub stats: Option<SyncStats>,
}

struct StoreInner {
    jobs: HashMap<Uuid, Job>,
    /// Insertion order; oldest first. Drives FIFO admission and eviction.
    order: Vec<Uuid>,
    /// The single admission slot. At most one job runs at a time so the
    /// downloader is never saturated by concurrent jobs.
    active: Option<Uuid>,
}

impl StoreInner {
    /// Fail a non-terminal job whose active phase outlived the ceiling.
    /// Frees the admission slot so a stuck download cannot block the queue.
    /// Returns the updated job for event emission.
    fn check_timeout(&mut self, id: Uuid, timeout: TimeDelta) -> Option<Job> {
        let job = self.jobs.get_mut(&id)?;
        if job.status.is_terminal() {
            return None;
        }
        let started_at = job.started_at?;
        if Utc::now() - started_at <= timeout {
            return None;
        }
        job.status = JobStatus::Failed;
        job.error = Some(TIMEOUT_ERROR.to_string());
        job.completed_at = Some(Utc::now());
        if self.active == Some(id) {
            self.active = None;
        }
        Some(job.clone())
    }
}

/// Thread-safe in-memory job registry with a capacity limit and a
/// single-active-job admission rule.
pub struct JobStore {
    inner: Mutex<StoreInner>,
    bus: Arc<JobEventBus>,
    max_jobs: usize,
    timeout: TimeDelta,
}

impl JobStore {
    pub const MAX_JOBS: usize = 50;
    pub const TIMEOUT_MINUTES: i64 = 30;

    pub fn new(bus: Arc<JobEventBus>) -> Self {
        Self::with_limits(bus, Self::MAX_JOBS, TimeDelta::minutes(Self::TIMEOUT_MINUTES))
    }

    /// Construct with explicit capacity and timeout, for tests.
    pub fn with_limits(bus: Arc<JobEventBus>, max_jobs: usize, timeout: TimeDelta) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                jobs: HashMap::new(),
                order: Vec::new(),
                active: None,
            }),
            bus,
            max_jobs,
            timeout,
        }
    }

    pub fn event_bus(&self) -> &Arc<JobEventBus> {
        &self.bus
    }

    /// Create a job in `Pending`. If the active slot is free the job is
    /// admitted (the slot is taken on its behalf) and the caller must start
    /// it. At capacity, the oldest terminal job is evicted first; if every
    /// tracked job is still live, enqueue fails with [`JobError::QueueFull`].
    pub fn enqueue(&self, url: impl Into<String>, kind: JobKind) -> Result<EnqueueOutcome, JobError> {
        let mut inner = self.inner.lock();
        if let Some(active_id) = inner.active {
            if let Some(job) = inner.check_timeout(active_id, self.timeout) {
                self.bus.emit(&JobEvent::Updated { job });
            }
        }

        while inner.jobs.len() >= self.max_jobs {
            let oldest_terminal = inner
                .order
                .iter()
                .copied()
                .find(|id| inner.jobs.get(id).is_some_and(|j| j.status.is_terminal()));
            let Some(evict_id) = oldest_terminal else {
                return Err(JobError::QueueFull);
            };
            inner.jobs.remove(&evict_id);
            inner.order.retain(|id| *id != evict_id);
            self.bus.emit(&JobEvent::Deleted { job_id: evict_id });
        }

        let job = Job::new(url.into(), kind);
        let id = job.id;
        inner.jobs.insert(id, job.clone());
        inner.order.push(id);

        let admitted = inner.active.is_none();
        if admitted {
            inner.active = Some(id);
        }

        self.bus.emit(&JobEvent::Created { job: job.clone() });
        Ok(if admitted {
            EnqueueOutcome::Admitted(job)
        } else {
            EnqueueOutcome::Queued(job)
        })
    }

    /// Get a job by id, failing it first if it has timed out.
    pub fn get(&self, id: Uuid) -> Option<Job> {
        let mut inner = self.inner.lock();
        if let Some(job) = inner.check_timeout(id, self.timeout) {
            self.bus.emit(&JobEvent::Updated { job });
        }
        inner.jobs.get(&id).cloned()
    }

    /// All jobs, most recent first.
    pub fn get_all(&self) -> Vec<Job> {
        let mut inner = self.inner.lock();
        let ids: Vec<Uuid> = inner.order.clone();
        for id in &ids {
            if let Some(job) = inner.check_timeout(*id, self.timeout) {
                self.bus.emit(&JobEvent::Updated { job });
            }
        }
        ids.iter()
            .rev()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    /// The job currently holding the active slot, if any.
    pub fn active_job(&self) -> Option<Job> {
        let mut inner = self.inner.lock();
        let active_id = inner.active?;
        if let Some(job) = inner.check_timeout(active_id, self.timeout) {
            self.bus.emit(&JobEvent::Updated { job });
        }
        // A timeout clears the slot, so re-read it.
        let active_id = inner.active?;
        inner.jobs.get(&active_id).cloned()
    }

    /// Atomically update a job's status and fields and broadcast the change.
    ///
    /// Rejected with [`JobError::AlreadyFinished`] once the job is terminal;
    /// late content-info backfill goes through
    /// [`backfill_content_info`](Self::backfill_content_info) instead.
    pub fn transition(
        &self,
        id: Uuid,
        status: JobStatus,
        fields: TransitionFields,
    ) -> Result<Job, JobError> {
        let mut inner = self.inner.lock();
        let job = inner.jobs.get_mut(&id).ok_or(JobError::NotFound)?;
        if job.status.is_terminal() {
            return Err(JobError::AlreadyFinished);
        }

        job.status = status;
        if let Some(progress) = fields.progress {
            // Progress never moves backwards within a run.
            job.progress = job.progress.max(progress.clamp(0.0, 100.0));
        }
        if let Some(message) = fields.message {
            job.message = message;
        }
        if let Some(content_info) = fields.content_info {
            job.content_info = Some(content_info);
        }
        if let Some(error) = fields.error {
            job.error = Some(error);
        }
        if let Some(stats) = fields.stats {
            job.stats = Some(stats);
        }
        if status == JobStatus::FetchingInfo && job.started_at.is_none() {
            job.started_at = Some(Utc::now());
        }
        if status.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(Utc::now());
        }

        let job = job.clone();
        self.bus.emit(&JobEvent::Updated { job: job.clone() });
        Ok(job)
    }

    /// Attach prefetched content info to a job that has not started yet.
    ///
    /// Returns `Ok(false)` (silently dropped) if the job already started,
    /// finished, or carries content info; the state machine is never
    /// re-opened from here.
    pub fn backfill_content_info(&self, id: Uuid, info: ContentInfo) -> Result<bool, JobError> {
        let mut inner = self.inner.lock();
        let job = inner.jobs.get_mut(&id).ok_or(JobError::NotFound)?;
        if job.status != JobStatus::Pending || job.content_info.is_some() {
            return Ok(false);
        }
        job.content_info = Some(info);
        let job = job.clone();
        self.bus.emit(&JobEvent::Updated { job });
        Ok(true)
    }

    /// Sole admission gate: if the active slot is free, claim it for the
    /// oldest pending job and return that job. A second call without an
    /// intervening [`release_active`](Self::release_active) returns `None`.
    pub fn pop_next_pending(&self) -> Option<Job> {
        let mut inner = self.inner.lock();
        if let Some(active_id) = inner.active {
            if let Some(job) = inner.check_timeout(active_id, self.timeout) {
                self.bus.emit(&JobEvent::Updated { job });
            }
        }
        if inner.active.is_some() {
            return None;
        }
        let next_id = inner
            .order
            .iter()
            .copied()
            .find(|id| inner.jobs.get(id).is_some_and(|j| j.status == JobStatus::Pending))?;
        inner.active = Some(next_id);
        inner.jobs.get(&next_id).cloned()
    }

    /// Clear the active slot iff it is held by `id`. Idempotent.
    pub fn release_active(&self, id: Uuid) {
        let mut inner = self.inner.lock();
        if inner.active == Some(id) {
            inner.active = None;
        }
    }

    /// Cancel a job that was never promoted to active. Running jobs are
    /// cancelled through the executor's token instead.
    pub fn cancel_pending(&self, id: Uuid) -> Result<Job, JobError> {
        let mut inner = self.inner.lock();
        let job = inner.jobs.get_mut(&id).ok_or(JobError::NotFound)?;
        if job.status.is_terminal() {
            return Err(JobError::AlreadyFinished);
        }
        if job.status != JobStatus::Pending {
            return Err(JobError::NotFinished);
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        let job = job.clone();
        // A pending job can hold the slot if it was admitted but not yet
        // started; free it so the queue keeps moving.
        if inner.active == Some(id) {
            inner.active = None;
        }
        self.bus.emit(&JobEvent::Updated { job: job.clone() });
        Ok(job)
    }

    /// Delete a finished job.
    pub fn delete(&self, id: Uuid) -> Result<(), JobError> {
        let mut inner = self.inner.lock();
        let job = inner.jobs.get(&id).ok_or(JobError::NotFound)?;
        if !job.status.is_terminal() {
            return Err(JobError::NotFinished);
        }
        inner.jobs.remove(&id);
        inner.order.retain(|j| *j != id);
        self.bus.emit(&JobEvent::Deleted { job_id: id });
        Ok(())
    }

    /// Remove every terminal job; returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut inner = self.inner.lock();
        let to_remove: Vec<Uuid> = inner
            .order
            .iter()
            .copied()
            .filter(|id| inner.jobs.get(id).is_some_and(|j| j.status.is_terminal()))
            .collect();
        for id in &to_remove {
            inner.jobs.remove(id);
        }
        inner.order.retain(|id| !to_remove.contains(id));
        let count = to_remove.len();
        if count > 0 {
            self.bus.emit(&JobEvent::Cleared { count });
        }
        count
    }
}
