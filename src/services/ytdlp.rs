//! yt-dlp subprocess client
//!
//! Implements both [`MetadataResolver`] and [`Downloader`] over the yt-dlp
//! command line. Metadata comes from `--dump-single-json --flat-playlist`,
//! which is fast and stable; downloads run with `--newline` so per-track
//! progress can be parsed off stdout line by line.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::jobs::{ContentInfo, JobKind};
use crate::services::downloader::{DownloadOutcome, DownloadProgress, Downloader};
use crate::services::resolver::{DiscographyPlan, MetadataResolver, ReleaseRef, ResolveError};
use crate::services::tagger::is_audio_file;

pub struct YtdlpClient {
    binary: String,
    audio_format: String,
    cookies_path: Option<PathBuf>,
}

impl YtdlpClient {
    pub fn new(binary: String, audio_format: String, cookies_path: Option<PathBuf>) -> Self {
        Self {
            binary,
            audio_format,
            cookies_path,
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--no-warnings");
        if let Some(cookies) = &self.cookies_path {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd
    }

    /// Run a metadata dump and parse the JSON document it prints.
    async fn dump_json(&self, url: &str) -> Result<Value, ResolveError> {
        let output = self
            .base_command()
            .args(["--dump-single-json", "--flat-playlist"])
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to execute {}", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim()));
        }
        let value = serde_json::from_slice(&output.stdout)
            .context("failed to parse yt-dlp JSON output")?;
        Ok(value)
    }
}

/// Map yt-dlp's stderr text onto the resolver error variants.
fn classify_failure(stderr: &str) -> ResolveError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("sign in") || lower.contains("cookies") || lower.contains("members-only") {
        ResolveError::AuthRequired
    } else if lower.contains("does not exist")
        || lower.contains("not available")
        || lower.contains("unavailable")
        || lower.contains("404")
    {
        ResolveError::NotFound
    } else {
        let detail = if stderr.is_empty() {
            "no error output".to_string()
        } else {
            stderr.to_string()
        };
        ResolveError::Other(anyhow!("yt-dlp failed: {detail}"))
    }
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| value[*k].as_str())
}

fn artist_of(value: &Value) -> String {
    str_field(value, &["artist", "uploader", "channel"])
        .unwrap_or("Unknown artist")
        .to_string()
}

fn thumbnail_of(value: &Value) -> Option<String> {
    if let Some(url) = value["thumbnail"].as_str() {
        return Some(url.to_string());
    }
    value["thumbnails"]
        .as_array()
        .and_then(|t| t.last())
        .and_then(|t| t["url"].as_str())
        .map(str::to_string)
}

fn year_of(value: &Value) -> Option<i32> {
    if let Some(year) = value["release_year"].as_i64() {
        return Some(year as i32);
    }
    // upload_date is YYYYMMDD.
    value["upload_date"]
        .as_str()
        .and_then(|d| d.get(..4))
        .and_then(|y| y.parse().ok())
}

#[async_trait]
impl MetadataResolver for YtdlpClient {
    async fn resolve(&self, url: &str, kind: JobKind) -> Result<ContentInfo, ResolveError> {
        let value = self.dump_json(url).await?;

        let title = str_field(&value, &["title"]).unwrap_or("Unknown title").to_string();
        let entries = value["entries"].as_array();
        let track_count = match kind {
            JobKind::Single => Some(1),
            _ => entries
                .map(|e| e.len() as u32)
                .or_else(|| value["playlist_count"].as_u64().map(|n| n as u32)),
        };
        let album_count = match kind {
            JobKind::Discography => entries.map(|e| e.len() as u32),
            _ => None,
        };

        Ok(ContentInfo {
            title,
            artist: artist_of(&value),
            year: year_of(&value),
            track_count,
            album_count,
            url: url.to_string(),
            thumbnail_url: thumbnail_of(&value),
        })
    }

    async fn list_releases(&self, url: &str) -> Result<DiscographyPlan, ResolveError> {
        let value = self.dump_json(url).await?;

        let releases = value["entries"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let release_url = str_field(entry, &["url", "webpage_url"])?;
                        Some(ReleaseRef {
                            title: str_field(entry, &["title"])
                                .unwrap_or("Untitled release")
                                .to_string(),
                            url: release_url.to_string(),
                            kind_label: release_kind_label(entry),
                            year: year_of(entry),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(DiscographyPlan {
            artist: artist_of(&value),
            thumbnail_url: thumbnail_of(&value),
            releases,
        })
    }
}

fn release_kind_label(entry: &Value) -> String {
    match entry["playlist_count"].as_u64().or(entry["n_entries"].as_u64()) {
        Some(1) => "Single".to_string(),
        Some(2..=6) => "EP".to_string(),
        _ => "Album".to_string(),
    }
}

#[async_trait]
impl Downloader for YtdlpClient {
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: UnboundedSender<DownloadProgress>,
        cancel: CancellationToken,
    ) -> DownloadOutcome {
        if let Err(e) = tokio::fs::create_dir_all(dest).await {
            return DownloadOutcome {
                error: Some(format!("failed to create download directory: {e}")),
                ..Default::default()
            };
        }

        let mut cmd = self.base_command();
        cmd.args(["-x", "--audio-format", &self.audio_format])
            .arg("--newline")
            .arg("-o")
            .arg(dest.join("%(playlist_index|01)s - %(title)s.%(ext)s"))
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return DownloadOutcome {
                    error: Some(format!("failed to spawn {}: {e}", self.binary)),
                    ..Default::default()
                };
            }
        };

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill().await;
                return DownloadOutcome {
                    error: Some("yt-dlp stdout unavailable".to_string()),
                    ..Default::default()
                };
            }
        };
        let mut lines = BufReader::new(stdout).lines();
        let mut parser = ProgressParser::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill yt-dlp after cancellation");
                    }
                    return DownloadOutcome {
                        cancelled: true,
                        files: collect_audio_files(dest),
                        ..Default::default()
                    };
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(update) = parser.parse_line(&line) {
                            let _ = progress.send(update);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "Error reading yt-dlp output");
                        break;
                    }
                },
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                return DownloadOutcome {
                    error: Some(format!("failed to wait for yt-dlp: {e}")),
                    ..Default::default()
                };
            }
        };

        let files = collect_audio_files(dest);
        if !status.success() && files.is_empty() {
            return DownloadOutcome {
                error: Some(format!(
                    "yt-dlp exited with status {}",
                    status.code().map_or("unknown".to_string(), |c| c.to_string())
                )),
                ..Default::default()
            };
        }
        if files.is_empty() {
            return DownloadOutcome {
                error: Some("download produced no audio files".to_string()),
                ..Default::default()
            };
        }
        DownloadOutcome {
            files,
            success: true,
            error: None,
            cancelled: false,
        }
    }
}

fn collect_audio_files(dest: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dest)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_audio_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Incremental parser over yt-dlp `--newline` stdout.
#[derive(Default)]
struct ProgressParser {
    track_index: u32,
    track_title: Option<String>,
}

impl ProgressParser {
    fn parse_line(&mut self, line: &str) -> Option<DownloadProgress> {
        let rest = line.strip_prefix("[download] ")?.trim_start();

        if let Some(item) = rest.strip_prefix("Downloading item ") {
            // "Downloading item 3 of 12"
            if let Some(n) = item.split_whitespace().next().and_then(|n| n.parse::<u32>().ok()) {
                self.track_index = n.saturating_sub(1);
                self.track_title = None;
            }
            return None;
        }
        if let Some(path) = rest.strip_prefix("Destination: ") {
            self.track_title = Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned());
            return None;
        }

        // "  42.5% of 3.52MiB at ..."
        let percent_str = rest.split('%').next()?;
        let percent: f64 = percent_str.trim().parse().ok()?;
        Some(DownloadProgress {
            track_index: self.track_index,
            track_title: self.track_title.clone(),
            percent: percent.clamp(0.0, 100.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_item_destination_and_percent_lines() {
        let mut parser = ProgressParser::default();
        assert!(parser.parse_line("[download] Downloading item 2 of 10").is_none());
        assert!(
            parser
                .parse_line("[download] Destination: /tmp/x/02 - Song Title.opus")
                .is_none()
        );

        let update = parser
            .parse_line("[download]  42.5% of 3.52MiB at 1.20MiB/s ETA 00:02")
            .unwrap();
        assert_eq!(update.track_index, 1);
        assert_eq!(update.track_title.as_deref(), Some("02 - Song Title"));
        assert!((update.percent - 42.5).abs() < f64::EPSILON);
    }

    #[test]
    fn ignores_unrelated_lines() {
        let mut parser = ProgressParser::default();
        assert!(parser.parse_line("[ExtractAudio] Destination: x.opus").is_none());
        assert!(parser.parse_line("[youtube] abc: Downloading webpage").is_none());
        assert!(parser.parse_line("").is_none());
    }

    #[test]
    fn classifies_auth_and_missing_errors() {
        assert_matches!(
            classify_failure("ERROR: Sign in to confirm you're not a bot"),
            ResolveError::AuthRequired
        );
        assert_matches!(
            classify_failure("ERROR: This playlist does not exist"),
            ResolveError::NotFound
        );
        assert_matches!(classify_failure("ERROR: something else"), ResolveError::Other(_));
    }

    #[test]
    fn year_prefers_release_year_over_upload_date() {
        let value: Value =
            serde_json::from_str(r#"{"release_year": 2019, "upload_date": "20210401"}"#).unwrap();
        assert_eq!(year_of(&value), Some(2019));
        let value: Value = serde_json::from_str(r#"{"upload_date": "20210401"}"#).unwrap();
        assert_eq!(year_of(&value), Some(2021));
    }
}
