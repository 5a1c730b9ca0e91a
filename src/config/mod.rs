//! Application configuration management

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// SQLite database path
    pub database_path: PathBuf,

    /// Music library root path
    pub library_path: PathBuf,

    /// Working directory for in-flight downloads
    pub downloads_path: PathBuf,

    /// Audio format passed to yt-dlp (`-x --audio-format`)
    pub audio_format: String,

    /// yt-dlp binary name or path
    pub ytdlp_binary: String,

    /// Optional cookies file for authenticated sources
    pub cookies_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .context("Invalid PORT")?,

            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./data/tunevault.db".to_string())
                .into(),

            library_path: env::var("LIBRARY_PATH")
                .unwrap_or_else(|_| "./data/library".to_string())
                .into(),

            downloads_path: env::var("DOWNLOADS_PATH")
                .unwrap_or_else(|_| "./data/downloads".to_string())
                .into(),

            audio_format: env::var("AUDIO_FORMAT").unwrap_or_else(|_| "opus".to_string()),

            ytdlp_binary: env::var("YTDLP_BINARY").unwrap_or_else(|_| "yt-dlp".to_string()),

            cookies_path: env::var("COOKIES_PATH").ok().map(Into::into),
        })
    }
}
