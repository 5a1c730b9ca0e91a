//! Library organizer
//!
//! Files downloaded tracks into the library as `Artist/Album/track`, reading
//! the embedded tags written during download. Tag reads run on the blocking
//! pool; moves fall back to copy+remove when the library sits on a different
//! filesystem than the download directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sanitize_filename::sanitize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::services::tagger::{TagOutcome, TagProgress, Tagger};

pub struct LibraryOrganizer {
    library_dir: PathBuf,
}

impl LibraryOrganizer {
    pub fn new(library_dir: PathBuf) -> Self {
        Self { library_dir }
    }

    /// Resolve the library directory a file belongs in from its tags.
    fn target_dir(&self, tags: &TrackTags) -> PathBuf {
        let artist = tags.artist.as_deref().unwrap_or("Unknown Artist");
        let album = tags.album.as_deref().unwrap_or("Unknown Album");
        self.library_dir.join(sanitize(artist)).join(sanitize(album))
    }
}

#[async_trait]
impl Tagger for LibraryOrganizer {
    async fn import(
        &self,
        files: &[PathBuf],
        progress: UnboundedSender<TagProgress>,
    ) -> TagOutcome {
        if files.is_empty() {
            return TagOutcome {
                error: Some("no files to import".to_string()),
                ..Default::default()
            };
        }

        let total = files.len() as u32;
        let mut imported = 0u32;
        let mut destination = None;
        let mut last_error = None;

        for (index, file) in files.iter().enumerate() {
            let path = file.clone();
            let tags = tokio::task::spawn_blocking(move || read_track_tags(&path))
                .await
                .ok()
                .flatten()
                .unwrap_or_default();

            let dir = self.target_dir(&tags);
            let result = async {
                tokio::fs::create_dir_all(&dir).await?;
                let file_name = file.file_name().ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "file has no name")
                })?;
                move_file(file, &dir.join(file_name)).await
            }
            .await;

            match result {
                Ok(()) => {
                    debug!(file = %file.display(), dir = %dir.display(), "Imported track");
                    imported += 1;
                    destination = Some(dir);
                }
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Failed to import track");
                    last_error = Some(format!("failed to import {}: {e}", file.display()));
                }
            }

            let _ = progress.send(TagProgress {
                completed: index as u32 + 1,
                total,
            });
        }

        TagOutcome {
            success: imported > 0,
            destination,
            track_count: imported,
            error: if imported > 0 { None } else { last_error },
        }
    }
}

/// Rename, falling back to copy+remove for cross-device moves.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

#[derive(Debug, Default)]
struct TrackTags {
    artist: Option<String>,
    album: Option<String>,
}

/// Read embedded tags with lofty. Returns None for unreadable or untagged
/// files; the caller falls back to `Unknown Artist/Unknown Album`.
fn read_track_tags(path: &Path) -> Option<TrackTags> {
    use lofty::prelude::*;
    use lofty::probe::Probe;

    let tagged_file = Probe::open(path).ok()?.read().ok()?;
    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag())?;

    Some(TrackTags {
        artist: tag
            .artist()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty()),
        album: tag.album().map(|s| s.to_string()).filter(|s| !s.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn untagged_files_land_in_unknown_artist() {
        let downloads = tempfile::tempdir().unwrap();
        let library = tempfile::tempdir().unwrap();
        let track = downloads.path().join("01 - Track.opus");
        tokio::fs::write(&track, b"not really audio").await.unwrap();

        let organizer = LibraryOrganizer::new(library.path().to_path_buf());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = organizer.import(&[track.clone()], tx).await;

        assert!(outcome.success);
        assert_eq!(outcome.track_count, 1);
        let expected = library
            .path()
            .join("Unknown Artist")
            .join("Unknown Album")
            .join("01 - Track.opus");
        assert!(expected.exists());
        assert!(!track.exists());
        assert_eq!(
            rx.recv().await,
            Some(TagProgress {
                completed: 1,
                total: 1
            })
        );
    }

    #[tokio::test]
    async fn empty_input_fails_with_error() {
        let library = tempfile::tempdir().unwrap();
        let organizer = LibraryOrganizer::new(library.path().to_path_buf());
        let (tx, _rx) = mpsc::unbounded_channel();

        let outcome = organizer.import(&[], tx).await;
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }
}
