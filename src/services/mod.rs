//! External collaborators of the sync pipeline
//!
//! The pipeline talks to three seams: a [`MetadataResolver`] that describes
//! what a URL contains, a [`Downloader`] that fetches audio into a working
//! directory, and a [`Tagger`] that files the results into the library.
//! Production wiring uses [`YtdlpClient`] for the first two and
//! [`LibraryOrganizer`] for the third.

pub mod downloader;
pub mod organizer;
pub mod resolver;
pub mod tagger;
pub mod ytdlp;

pub use downloader::{cleanup_partial_files, DownloadOutcome, DownloadProgress, Downloader};
pub use organizer::LibraryOrganizer;
pub use resolver::{DiscographyPlan, MetadataResolver, ReleaseRef, ResolveError};
pub use tagger::{TagOutcome, TagProgress, Tagger};
pub use ytdlp::YtdlpClient;
