//! Discography runs: every release of an artist, sequentially
//!
//! Releases run through the single-item pipeline one at a time so the
//! downloader is never used concurrently. Each release's 0..=100 progress is
//! rescaled into its 1/N slice of the overall bar, a failed release is
//! recorded and skipped, and the run counts as successful when at least one
//! release completed.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::jobs::{ContentInfo, Job, JobKind, SyncStats};
use crate::services::ResolveError;
use crate::sync::{emit, ProgressEvent, ProgressSender, ProgressStep, SyncOutcome, SyncPipeline};

/// Map one release's local progress into the overall scale: release `index`
/// of `total` owns the band `[index/total*100, (index+1)/total*100)`.
fn scale_release_progress(index: usize, total: usize, percent: f64) -> f64 {
    let total = total.max(1) as f64;
    ((index as f64 / total) * 100.0 + percent / total).clamp(0.0, 100.0)
}

pub(super) async fn run(
    pipeline: &SyncPipeline,
    job: &Job,
    progress: ProgressSender,
    cancel: CancellationToken,
) -> SyncOutcome {
    emit(&progress, ProgressStep::FetchingInfo, "Fetching artist releases", Some(0.0), None);

    let plan = match pipeline.resolver.list_releases(&job.url).await {
        Ok(plan) => plan,
        Err(e) => {
            let error = match e {
                ResolveError::NotFound => "Artist not found".to_string(),
                ResolveError::AuthRequired => {
                    "Authentication required to access this artist".to_string()
                }
                ResolveError::Other(e) => format!("Failed to list releases: {e}"),
            };
            emit(&progress, ProgressStep::Failed, &error, None, None);
            return SyncOutcome::failure(error);
        }
    };
    let total = plan.releases.len();
    if total == 0 {
        let error = "No releases found for this artist".to_string();
        emit(&progress, ProgressStep::Failed, &error, None, None);
        return SyncOutcome::failure(error);
    }

    let mut aggregate = ContentInfo {
        title: format!("{} discography", plan.artist),
        artist: plan.artist.clone(),
        year: None,
        track_count: Some(0),
        album_count: Some(total as u32),
        url: job.url.clone(),
        thumbnail_url: plan.thumbnail_url.clone(),
    };
    emit(
        &progress,
        ProgressStep::FetchingInfo,
        format!("Found {total} release(s) for {}", plan.artist),
        Some(0.0),
        Some(aggregate.clone()),
    );

    let mut stats = SyncStats {
        releases_total: total as u32,
        ..Default::default()
    };
    let mut errors = Vec::new();
    let mut completed = 0u32;

    for (index, release) in plan.releases.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }

        // Relay the release's events into its slice of the overall bar.
        // Terminal steps stay internal; the loop reports completion itself.
        let (release_tx, mut release_rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let relay = {
            let progress = progress.clone();
            let label = release.kind_label.clone();
            let title = release.title.clone();
            tokio::spawn(async move {
                while let Some(event) = release_rx.recv().await {
                    if matches!(event.step, ProgressStep::Completed | ProgressStep::Failed) {
                        continue;
                    }
                    emit(
                        &progress,
                        event.step,
                        format!("[{label}] {title}: {}", event.message),
                        event.progress.map(|p| scale_release_progress(index, total, p)),
                        None,
                    );
                }
            })
        };

        let dest = pipeline.job_dir(job.id).join(format!("release-{:02}", index + 1));
        let result = pipeline
            .run_single(&release.url, JobKind::Playlist, &dest, release_tx, cancel.clone())
            .await;
        let _ = relay.await;

        if result.cancelled {
            break;
        }
        if !result.success {
            let error = format!("{}: {}", release.title, result.error_summary());
            warn!(release = %release.title, error = %error, "Release failed; continuing");
            errors.push(error);
            stats.tracks_failed += result.stats.tracks_failed;
            continue;
        }

        completed += 1;
        stats.tracks_downloaded += result.stats.tracks_downloaded;
        stats.tracks_failed += result.stats.tracks_failed;
        if let Some(info) = &result.content_info {
            aggregate.track_count = Some(
                aggregate.track_count.unwrap_or(0) + info.track_count.unwrap_or(0),
            );
        }
        emit(
            &progress,
            ProgressStep::Downloading,
            format!("Completed {} ({completed}/{total})", release.title),
            Some(scale_release_progress(index, total, 100.0)),
            None,
        );
    }

    stats.releases_completed = completed;
    let cancelled = cancel.is_cancelled();
    let success = completed > 0 && !cancelled;
    info!(
        artist = %plan.artist,
        completed,
        total,
        failed = errors.len(),
        "Discography run finished"
    );

    SyncOutcome {
        success,
        cancelled,
        content_info: Some(aggregate),
        destination: None,
        stats,
        errors,
    }
}
