//! Library import seam.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// Import progress, counted in whole files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagProgress {
    pub completed: u32,
    pub total: u32,
}

/// Result of filing downloaded tracks into the library.
#[derive(Debug, Default)]
pub struct TagOutcome {
    pub success: bool,
    /// Directory the tracks ended up in, when at least one was imported.
    pub destination: Option<PathBuf>,
    pub track_count: u32,
    pub error: Option<String>,
}

/// Moves finished downloads into their final library layout.
#[async_trait]
pub trait Tagger: Send + Sync {
    async fn import(&self, files: &[PathBuf], progress: UnboundedSender<TagProgress>)
        -> TagOutcome;
}

/// Audio extensions the import step accepts.
pub const AUDIO_EXTENSIONS: &[&str] = &["opus", "mp3", "m4a", "flac", "ogg", "wav"];

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.as_str()))
}
