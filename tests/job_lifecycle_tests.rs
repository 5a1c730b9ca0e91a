//! End-to-end job lifecycle tests against scripted collaborators
//!
//! These drive the executor, store, and event bus together the way the HTTP
//! layer does, with downloads replaced by a scripted stub so runs are fast
//! and deterministic.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tunevault::jobs::{
    ContentInfo, Job, JobEventBus, JobExecutor, JobKind, JobStatus, JobStore, TransitionFields,
};
use tunevault::services::{
    DiscographyPlan, DownloadOutcome, DownloadProgress, Downloader, MetadataResolver, ReleaseRef,
    ResolveError, TagOutcome, TagProgress, Tagger,
};
use tunevault::sync::SyncPipeline;

struct StubResolver {
    releases: Vec<ReleaseRef>,
}

#[async_trait]
impl MetadataResolver for StubResolver {
    async fn resolve(&self, url: &str, _kind: JobKind) -> Result<ContentInfo, ResolveError> {
        Ok(ContentInfo {
            title: format!("Content at {url}"),
            artist: "Artist".to_string(),
            year: Some(2024),
            track_count: Some(2),
            album_count: None,
            url: url.to_string(),
            thumbnail_url: None,
        })
    }

    async fn list_releases(&self, _url: &str) -> Result<DiscographyPlan, ResolveError> {
        Ok(DiscographyPlan {
            artist: "Artist".to_string(),
            thumbnail_url: None,
            releases: self.releases.clone(),
        })
    }
}

/// Downloader whose behavior is keyed off the URL and an optional gate.
#[derive(Default)]
struct ScriptedDownloader {
    /// Block each download until a permit is released.
    gate: Option<Arc<Semaphore>>,
    /// URLs containing this marker fail.
    fail_marker: Option<&'static str>,
    /// URLs containing this marker panic mid-download.
    panic_marker: Option<&'static str>,
    /// Park until the cancel token fires, then report a cancelled download.
    wait_for_cancel: bool,
    /// URLs successfully downloaded, in order.
    downloaded: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Downloader for ScriptedDownloader {
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: UnboundedSender<DownloadProgress>,
        cancel: CancellationToken,
    ) -> DownloadOutcome {
        if self.panic_marker.is_some_and(|m| url.contains(m)) {
            panic!("scripted panic for {url}");
        }
        if self.wait_for_cancel {
            cancel.cancelled().await;
            return DownloadOutcome {
                cancelled: true,
                ..Default::default()
            };
        }
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if self.fail_marker.is_some_and(|m| url.contains(m)) {
            return DownloadOutcome {
                error: Some("download failed".to_string()),
                ..Default::default()
            };
        }

        self.downloaded.lock().push(url.to_string());
        let _ = progress.send(DownloadProgress {
            track_index: 0,
            track_title: Some("Track".to_string()),
            percent: 100.0,
        });
        DownloadOutcome {
            files: vec![dest.join("01 - Track.opus"), dest.join("02 - Track.opus")],
            success: true,
            error: None,
            cancelled: false,
        }
    }
}

struct StubTagger;

#[async_trait]
impl Tagger for StubTagger {
    async fn import(
        &self,
        files: &[PathBuf],
        progress: UnboundedSender<TagProgress>,
    ) -> TagOutcome {
        let total = files.len() as u32;
        let _ = progress.send(TagProgress {
            completed: total,
            total,
        });
        TagOutcome {
            success: true,
            destination: files.first().and_then(|f| f.parent().map(Into::into)),
            track_count: total,
            error: None,
        }
    }
}

struct Harness {
    store: Arc<JobStore>,
    executor: Arc<JobExecutor>,
    bus: Arc<JobEventBus>,
}

fn harness(downloader: ScriptedDownloader, releases: Vec<ReleaseRef>) -> Harness {
    let bus = Arc::new(JobEventBus::new());
    let store = Arc::new(JobStore::new(bus.clone()));
    let workdir = std::env::temp_dir().join(format!("tunevault-test-{}", Uuid::new_v4()));
    let pipeline = Arc::new(SyncPipeline::new(
        Arc::new(StubResolver { releases }),
        Arc::new(downloader),
        Arc::new(StubTagger),
        workdir.clone(),
    ));
    let executor = Arc::new(JobExecutor::new(store.clone(), pipeline, workdir));
    Harness {
        store,
        executor,
        bus,
    }
}

fn release(title: &str, url: &str) -> ReleaseRef {
    ReleaseRef {
        title: title.to_string(),
        url: url.to_string(),
        kind_label: "Album".to_string(),
        year: Some(2024),
    }
}

async fn wait_for_status(store: &JobStore, id: Uuid, status: JobStatus) -> Job {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(job) = store.get(id) {
                if job.status == status {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {status:?}"))
}

async fn wait_until<F: Fn() -> bool>(what: &str, predicate: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting until {what}"));
}

#[tokio::test]
async fn second_job_waits_then_runs_after_the_first() {
    let gate = Arc::new(Semaphore::new(0));
    let downloaded = Arc::new(Mutex::new(Vec::new()));
    let h = harness(
        ScriptedDownloader {
            gate: Some(gate.clone()),
            downloaded: downloaded.clone(),
            ..Default::default()
        },
        Vec::new(),
    );

    let first = h.executor.submit("https://music.example.com/a", JobKind::Playlist).unwrap();
    wait_for_status(&h.store, first.id, JobStatus::Downloading).await;

    let second = h.executor.submit("https://music.example.com/b", JobKind::Playlist).unwrap();
    assert_eq!(h.store.get(second.id).unwrap().status, JobStatus::Pending);

    gate.add_permits(1);
    let first = wait_for_status(&h.store, first.id, JobStatus::Completed).await;
    assert_eq!(first.progress, 100.0);
    assert!(first.completed_at.is_some());

    // The queued job is promoted without any new submission.
    gate.add_permits(1);
    wait_for_status(&h.store, second.id, JobStatus::Completed).await;
    assert_eq!(
        *downloaded.lock(),
        vec![
            "https://music.example.com/a".to_string(),
            "https://music.example.com/b".to_string(),
        ]
    );
}

#[tokio::test]
async fn cancelled_pending_job_is_never_executed() {
    let gate = Arc::new(Semaphore::new(0));
    let downloaded = Arc::new(Mutex::new(Vec::new()));
    let h = harness(
        ScriptedDownloader {
            gate: Some(gate.clone()),
            downloaded: downloaded.clone(),
            ..Default::default()
        },
        Vec::new(),
    );

    let running = h.executor.submit("https://music.example.com/a", JobKind::Playlist).unwrap();
    wait_for_status(&h.store, running.id, JobStatus::Downloading).await;
    let pending = h.executor.submit("https://music.example.com/b", JobKind::Playlist).unwrap();

    // No token exists for a job that has not started.
    assert!(!h.executor.cancel(pending.id));
    let cancelled = h.store.cancel_pending(pending.id).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    gate.add_permits(2);
    wait_for_status(&h.store, running.id, JobStatus::Completed).await;
    wait_until("the active slot is free", || h.store.active_job().is_none()).await;
    assert_eq!(*downloaded.lock(), vec!["https://music.example.com/a".to_string()]);
    assert_eq!(h.store.get(pending.id).unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn cancelling_a_running_job_frees_the_slot() {
    let h = harness(
        ScriptedDownloader {
            wait_for_cancel: true,
            ..Default::default()
        },
        Vec::new(),
    );

    let job = h.executor.submit("https://music.example.com/a", JobKind::Playlist).unwrap();
    wait_for_status(&h.store, job.id, JobStatus::Downloading).await;

    assert!(h.executor.cancel(job.id));
    h.store
        .transition(
            job.id,
            JobStatus::Cancelled,
            TransitionFields {
                message: Some("Cancellation requested".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    wait_until("the active slot is free", || h.store.active_job().is_none()).await;
    // The final status stays Cancelled; the run's teardown must not
    // overwrite it with Failed.
    assert_eq!(h.store.get(job.id).unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn discography_succeeds_when_some_releases_fail() {
    let h = harness(
        ScriptedDownloader {
            fail_marker: Some("broken"),
            ..Default::default()
        },
        vec![
            release("First Album", "https://music.example.com/first"),
            release("Broken Album", "https://music.example.com/broken"),
            release("Third Album", "https://music.example.com/third"),
        ],
    );

    let job = h
        .executor
        .submit("https://music.example.com/channel/UCx", JobKind::Discography)
        .unwrap();
    let job = wait_for_status(&h.store, job.id, JobStatus::Completed).await;

    assert_eq!(job.progress, 100.0);
    let stats = job.stats.unwrap();
    assert_eq!(stats.releases_total, 3);
    assert_eq!(stats.releases_completed, 2);
    assert_eq!(stats.tracks_downloaded, 4);

    let info = job.content_info.unwrap();
    assert_eq!(info.title, "Artist discography");
    assert_eq!(info.album_count, Some(3));

    // The failed release is recorded without failing the job.
    assert!(job.error.unwrap().contains("Broken Album"));
}

#[tokio::test]
async fn discography_fails_when_every_release_fails() {
    let h = harness(
        ScriptedDownloader {
            fail_marker: Some("example.com"),
            ..Default::default()
        },
        vec![
            release("First Album", "https://music.example.com/first"),
            release("Second Album", "https://music.example.com/second"),
        ],
    );

    let job = h
        .executor
        .submit("https://music.example.com/channel/UCx", JobKind::Discography)
        .unwrap();
    let job = wait_for_status(&h.store, job.id, JobStatus::Failed).await;

    let stats = job.stats.unwrap();
    assert_eq!(stats.releases_completed, 0);
    assert!(job.error.is_some());
}

#[tokio::test]
async fn failed_download_fails_the_job() {
    let h = harness(
        ScriptedDownloader {
            fail_marker: Some("example.com"),
            ..Default::default()
        },
        Vec::new(),
    );

    let job = h.executor.submit("https://music.example.com/a", JobKind::Playlist).unwrap();
    let job = wait_for_status(&h.store, job.id, JobStatus::Failed).await;
    assert_eq!(job.error.as_deref(), Some("download failed"));
    wait_until("the active slot is free", || h.store.active_job().is_none()).await;
}

#[tokio::test]
async fn panic_during_a_run_fails_the_job_and_keeps_the_queue_moving() {
    let h = harness(
        ScriptedDownloader {
            panic_marker: Some("boom"),
            ..Default::default()
        },
        Vec::new(),
    );

    let bad = h.executor.submit("https://music.example.com/boom", JobKind::Playlist).unwrap();
    let good = h.executor.submit("https://music.example.com/fine", JobKind::Playlist).unwrap();

    let bad = wait_for_status(&h.store, bad.id, JobStatus::Failed).await;
    assert_eq!(
        bad.error.as_deref(),
        Some("Internal error during job execution")
    );

    // The panic did not wedge the executor.
    wait_for_status(&h.store, good.id, JobStatus::Completed).await;
}

#[tokio::test]
async fn event_stream_reports_the_whole_lifecycle_in_order() {
    let h = harness(ScriptedDownloader::default(), Vec::new());
    let mut subscription = h.bus.subscribe();

    let job = h.executor.submit("https://music.example.com/a", JobKind::Playlist).unwrap();
    wait_for_status(&h.store, job.id, JobStatus::Completed).await;

    let mut events = Vec::new();
    while let Some(message) = subscription.try_recv() {
        events.push(serde_json::from_str::<serde_json::Value>(&message.json).unwrap());
    }

    assert_eq!(events.first().unwrap()["type"], "created");
    assert_eq!(events.first().unwrap()["job"]["status"], "pending");
    assert_eq!(events.last().unwrap()["type"], "updated");
    assert_eq!(events.last().unwrap()["job"]["status"], "completed");

    // Progress never regresses across the published snapshots.
    let mut last = 0.0;
    for event in &events {
        if let Some(progress) = event["job"]["progress"].as_f64() {
            assert!(progress >= last, "progress regressed: {progress} < {last}");
            last = progress;
        }
    }
    assert_eq!(last, 100.0);
}

#[tokio::test]
async fn queued_job_receives_prefetched_content_info() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(
        ScriptedDownloader {
            gate: Some(gate.clone()),
            ..Default::default()
        },
        Vec::new(),
    );

    let running = h.executor.submit("https://music.example.com/a", JobKind::Playlist).unwrap();
    wait_for_status(&h.store, running.id, JobStatus::Downloading).await;
    let queued = h.executor.submit("https://music.example.com/b", JobKind::Playlist).unwrap();

    // The prefetch resolves metadata while the job is still pending.
    wait_until("content info is backfilled", || {
        h.store
            .get(queued.id)
            .is_some_and(|j| j.content_info.is_some() && j.status == JobStatus::Pending)
    })
    .await;

    gate.add_permits(2);
    wait_for_status(&h.store, queued.id, JobStatus::Completed).await;
}
