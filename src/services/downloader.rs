//! Download seam and working-directory hygiene.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Raw per-track progress as reported by the download backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Zero-based index of the track currently downloading.
    pub track_index: u32,
    pub track_title: Option<String>,
    /// Percent of the current track, 0..=100.
    pub percent: f64,
}

/// What a download attempt produced.
#[derive(Debug, Default)]
pub struct DownloadOutcome {
    /// Completed audio files, ready for tagging.
    pub files: Vec<PathBuf>,
    pub success: bool,
    pub error: Option<String>,
    /// Set when the run stopped because the cancel token fired.
    pub cancelled: bool,
}

/// Fetches audio for a URL into a working directory, streaming progress.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: UnboundedSender<DownloadProgress>,
        cancel: CancellationToken,
    ) -> DownloadOutcome;
}

/// Extensions left behind by an interrupted download.
const PARTIAL_EXTENSIONS: &[&str] = &["part", "ytdl", "temp"];

/// Remove leftover partial-download artifacts under `dir`. Returns how many
/// files were deleted.
pub fn cleanup_partial_files(dir: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();
        let partial = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| PARTIAL_EXTENSIONS.contains(&e))
            || name.contains(".part-Frag");
        if !partial {
            continue;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed partial download file");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_removes_only_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("01 - Song.opus");
        let part = dir.path().join("02 - Song.opus.part");
        let frag = dir.path().join("03 - Song.opus.part-Frag12");
        let ytdl = dir.path().join("04 - Song.opus.ytdl");
        for p in [&keep, &part, &frag, &ytdl] {
            std::fs::write(p, b"x").unwrap();
        }

        assert_eq!(cleanup_partial_files(dir.path()), 3);
        assert!(keep.exists());
        assert!(!part.exists());
        assert!(!frag.exists());
        assert!(!ytdl.exists());
    }

    #[test]
    fn cleanup_of_missing_dir_is_a_noop() {
        assert_eq!(cleanup_partial_files(Path::new("/nonexistent/tunevault")), 0);
    }
}
