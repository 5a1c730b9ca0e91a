//! Sync pipeline: resolve → download → import, with weighted progress
//!
//! A run moves through three phases whose progress maps onto fixed bands of
//! the overall 0..=100 scale: metadata occupies 0–10, downloading 10–90, and
//! the library import 90–100. Progress is reported as [`ProgressEvent`]s on
//! an unbounded channel owned by the caller; the pipeline itself never
//! touches job state.

pub mod discography;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::jobs::{ContentInfo, Job, JobKind, SyncStats};
use crate::services::{DownloadProgress, Downloader, MetadataResolver, ResolveError, TagProgress, Tagger};

/// Which phase of the pipeline an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    FetchingInfo,
    Downloading,
    Importing,
    Completed,
    Failed,
}

/// One progress report from a running sync.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub step: ProgressStep,
    pub message: String,
    /// Overall progress 0..=100, when the phase can quantify it.
    pub progress: Option<f64>,
    /// Attached once resolution has produced metadata.
    pub content_info: Option<ContentInfo>,
}

pub type ProgressSender = UnboundedSender<ProgressEvent>;

/// Final result of a sync run.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub success: bool,
    pub cancelled: bool,
    pub content_info: Option<ContentInfo>,
    pub destination: Option<PathBuf>,
    pub stats: SyncStats,
    /// Non-fatal and fatal errors accumulated during the run.
    pub errors: Vec<String>,
}

impl SyncOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
            ..Default::default()
        }
    }

    fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Default::default()
        }
    }

    /// All errors joined, or a generic fallback when none were recorded.
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            "Unknown error".to_string()
        } else {
            self.errors.join("; ")
        }
    }
}

/// Download band: per-track progress maps into overall 10–90.
fn download_overall(track_index: u32, total_tracks: u32, percent: f64) -> f64 {
    let total = total_tracks.max(1) as f64;
    let done = track_index as f64 + percent / 100.0;
    (10.0 + (done / total) * 80.0).clamp(10.0, 90.0)
}

/// Import band: whole-file progress maps into overall 90–100.
fn import_overall(completed: u32, total: u32) -> f64 {
    let total = total.max(1) as f64;
    (90.0 + (completed as f64 / total) * 10.0).clamp(90.0, 100.0)
}

pub struct SyncPipeline {
    resolver: Arc<dyn MetadataResolver>,
    downloader: Arc<dyn Downloader>,
    tagger: Arc<dyn Tagger>,
    downloads_dir: PathBuf,
}

impl SyncPipeline {
    pub fn new(
        resolver: Arc<dyn MetadataResolver>,
        downloader: Arc<dyn Downloader>,
        tagger: Arc<dyn Tagger>,
        downloads_dir: PathBuf,
    ) -> Self {
        Self {
            resolver,
            downloader,
            tagger,
            downloads_dir,
        }
    }

    pub fn resolver(&self) -> &Arc<dyn MetadataResolver> {
        &self.resolver
    }

    /// Working directory for one job's downloads.
    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.downloads_dir.join(job_id.to_string())
    }

    /// Run the pipeline for a job, dispatching on its kind.
    pub async fn run(
        &self,
        job: &Job,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> SyncOutcome {
        match job.kind {
            JobKind::Discography => discography::run(self, job, progress, cancel).await,
            _ => {
                self.run_single(&job.url, job.kind, &self.job_dir(job.id), progress, cancel)
                    .await
            }
        }
    }

    /// Sync one track or playlist URL into `dest` and then the library.
    async fn run_single(
        &self,
        url: &str,
        kind: JobKind,
        dest: &Path,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> SyncOutcome {
        emit(&progress, ProgressStep::FetchingInfo, "Fetching release info", Some(0.0), None);

        let info = match self.resolver.resolve(url, kind).await {
            Ok(info) => info,
            Err(e) => {
                let error = resolve_error_message(&e);
                emit(&progress, ProgressStep::Failed, &error, None, None);
                return SyncOutcome::failure(error);
            }
        };
        let total_tracks = info.track_count.unwrap_or(1).max(1);
        emit(
            &progress,
            ProgressStep::FetchingInfo,
            format!("Found {total_tracks} track(s): {}", info.title),
            Some(10.0),
            Some(info.clone()),
        );

        if cancel.is_cancelled() {
            return SyncOutcome::cancelled();
        }

        // Download phase. A relay task rescales raw per-track percentages
        // into the 10-90 band; it ends when the downloader drops its sender.
        emit(&progress, ProgressStep::Downloading, "Starting download", Some(10.0), None);
        let (download_tx, mut download_rx) = mpsc::unbounded_channel::<DownloadProgress>();
        let relay = {
            let progress = progress.clone();
            tokio::spawn(async move {
                while let Some(update) = download_rx.recv().await {
                    let title = update.track_title.as_deref().unwrap_or("track");
                    emit(
                        &progress,
                        ProgressStep::Downloading,
                        format!(
                            "Downloading {}/{}: {title}",
                            update.track_index + 1,
                            total_tracks.max(update.track_index + 1)
                        ),
                        Some(download_overall(update.track_index, total_tracks, update.percent)),
                        None,
                    );
                }
            })
        };
        let downloaded = self
            .downloader
            .download(url, dest, download_tx, cancel.clone())
            .await;
        let _ = relay.await;

        if downloaded.cancelled || cancel.is_cancelled() {
            return SyncOutcome::cancelled();
        }
        if !downloaded.success {
            let error = downloaded
                .error
                .unwrap_or_else(|| "download failed".to_string());
            emit(&progress, ProgressStep::Failed, &error, None, None);
            return SyncOutcome {
                content_info: Some(info),
                ..SyncOutcome::failure(error)
            };
        }

        let track_total = downloaded.files.len() as u32;
        emit(
            &progress,
            ProgressStep::Downloading,
            format!("Downloaded {track_total} track(s)"),
            Some(90.0),
            None,
        );

        // Import phase: 90-100.
        emit(&progress, ProgressStep::Importing, "Importing into library", Some(90.0), None);
        let (import_tx, mut import_rx) = mpsc::unbounded_channel::<TagProgress>();
        let relay = {
            let progress = progress.clone();
            tokio::spawn(async move {
                while let Some(update) = import_rx.recv().await {
                    emit(
                        &progress,
                        ProgressStep::Importing,
                        format!("Imported {}/{}", update.completed, update.total),
                        Some(import_overall(update.completed, update.total)),
                        None,
                    );
                }
            })
        };
        let imported = self.tagger.import(&downloaded.files, import_tx).await;
        let _ = relay.await;

        if cancel.is_cancelled() {
            return SyncOutcome::cancelled();
        }
        if !imported.success {
            let error = imported.error.unwrap_or_else(|| "import failed".to_string());
            emit(&progress, ProgressStep::Failed, &error, None, None);
            return SyncOutcome {
                content_info: Some(info),
                stats: SyncStats {
                    tracks_downloaded: track_total,
                    tracks_failed: track_total,
                    ..Default::default()
                },
                ..SyncOutcome::failure(error)
            };
        }

        let destination = imported.destination;
        debug!(url, tracks = imported.track_count, "Sync run finished");
        emit(
            &progress,
            ProgressStep::Completed,
            match &destination {
                Some(dir) => format!("Sync complete: {}", dir.display()),
                None => "Sync complete".to_string(),
            },
            Some(100.0),
            None,
        );

        SyncOutcome {
            success: true,
            cancelled: false,
            content_info: Some(info),
            destination,
            stats: SyncStats {
                tracks_downloaded: imported.track_count,
                tracks_failed: track_total.saturating_sub(imported.track_count),
                ..Default::default()
            },
            errors: Vec::new(),
        }
    }
}

fn resolve_error_message(error: &ResolveError) -> String {
    match error {
        ResolveError::NotFound => "Content not found".to_string(),
        ResolveError::AuthRequired => "Authentication required to access this content".to_string(),
        ResolveError::Other(e) => format!("Failed to fetch content info: {e}"),
    }
}

/// Send one event, ignoring a closed receiver (the run is being torn down).
fn emit(
    progress: &ProgressSender,
    step: ProgressStep,
    message: impl Into<String>,
    pct: Option<f64>,
    content_info: Option<ContentInfo>,
) {
    let _ = progress.send(ProgressEvent {
        step,
        message: message.into(),
        progress: pct,
        content_info,
    });
}
