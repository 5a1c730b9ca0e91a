//! Metadata resolution seam.

use async_trait::async_trait;

use crate::jobs::{ContentInfo, JobKind};

/// Failures while describing remote content.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("content not found")]
    NotFound,
    /// The source demands authentication (age gate, members-only, bot check).
    #[error("authentication required")]
    AuthRequired,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One release on an artist's page, before it has been resolved in full.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseRef {
    pub title: String,
    pub url: String,
    /// Human label for the release type ("Album", "Single", ...).
    pub kind_label: String,
    pub year: Option<i32>,
}

/// Everything needed to run a discography job: who the artist is and which
/// releases to sync, in the order they should run.
#[derive(Debug, Clone)]
pub struct DiscographyPlan {
    pub artist: String,
    pub thumbnail_url: Option<String>,
    pub releases: Vec<ReleaseRef>,
}

/// Describes what a URL contains without downloading it.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Resolve a track, playlist, or artist URL into display metadata.
    async fn resolve(&self, url: &str, kind: JobKind) -> Result<ContentInfo, ResolveError>;

    /// Enumerate the releases behind an artist URL.
    async fn list_releases(&self, url: &str) -> Result<DiscographyPlan, ResolveError>;
}
