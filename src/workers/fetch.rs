//! Download supervisor.
//!
//! Locates a rendering of a track through the external fetcher's search mode,
//! then extracts audio to the fixed per-track output path, publishing a
//! progress event for every percentage line the fetcher prints.

use crate::bus::ProgressBus;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{ProgressEvent, Stage, TrackDescriptor};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Top search hit: a stable content id plus display title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub video_id: String,
    pub title: String,
    pub url: String,
}

/// Spawns and supervises the download subprocess for one track at a time.
pub struct FetchSupervisor {
    config: Arc<Config>,
    bus: ProgressBus,
}

impl FetchSupervisor {
    pub fn new(config: Arc<Config>, bus: ProgressBus) -> Self {
        Self { config, bus }
    }

    /// Download the track's audio to `<songs>/<id>/base.mp3`.
    ///
    /// Returns the output path on success.
    pub async fn run(&self, track: &TrackDescriptor) -> Result<PathBuf> {
        let hit = self.search(track).await?;
        debug!(track_id = %track.id, title = %hit.title, "search resolved");

        let track_dir = self.config.track_dir(&track.id);
        tokio::fs::create_dir_all(&track_dir).await?;

        let output_path = self.config.track_audio_path(&track.id);
        self.download(track, &hit.url, &output_path).await?;

        info!(track_id = %track.id, path = %output_path.display(), "download finished");
        Ok(output_path)
    }

    /// Resolve the top search result for `artists… name`.
    async fn search(&self, track: &TrackDescriptor) -> Result<SearchHit> {
        let query = format!(
            "ytsearch1:{} {}",
            track.artists_for_search(),
            track.name
        );

        let output = Command::new(&self.config.fetcher_bin)
            .args(["--get-id", "--get-title"])
            .arg(&query)
            .output()
            .await
            .map_err(|e| Error::Fetcher(format!("failed to start fetcher: {e}")))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(Error::Fetcher(format!(
                "search failed ({}): {}",
                output.status,
                combined.trim()
            )));
        }

        parse_search_output(&combined)
    }

    /// Run the extraction and stream progress off the child's stdout.
    async fn download(&self, track: &TrackDescriptor, url: &str, output: &Path) -> Result<()> {
        let mut child = Command::new(&self.config.fetcher_bin)
            .args(["-x", "--audio-format", "mp3", "-o"])
            .arg(output)
            .arg(url)
            // Progress must keep flowing when stdout is a pipe, one update
            // per line.
            .args(["--progress", "--newline"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Fetcher(format!("failed to start fetcher: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Fetcher("missing stdout pipe".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Fetcher("missing stderr pipe".into()))?;

        let bus = self.bus.clone();
        let track_id = track.id.clone();
        let progress_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.contains("[download]") && line.contains('%') {
                    if let Some(percent) = parse_progress_line(&line) {
                        bus.publish(ProgressEvent::active(Stage::Download, &track_id, percent))
                            .await;
                    }
                }
            }
        });

        // Collect stderr so a failure carries the fetcher's own diagnostics.
        let stderr_task = tokio::spawn(async move {
            let mut captured = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                captured.push_str(&line);
                captured.push('\n');
            }
            captured
        });

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Fetcher(format!("failed to wait for fetcher: {e}")))?;
        let _ = progress_task.await;
        let captured = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let detail = captured.trim();
            let message = if detail.is_empty() {
                format!("download failed ({status})")
            } else {
                format!("download failed ({status}): {detail}")
            };
            return Err(Error::Fetcher(message));
        }

        Ok(())
    }
}

/// Parse the fetcher's search output: warning lines (a `WARNING:` prefix or a
/// bracketed status prefix) are noise; the first two remaining lines are the
/// title and the content id.
pub(crate) fn parse_search_output(raw: &str) -> Result<SearchHit> {
    let content: Vec<&str> = raw
        .trim()
        .lines()
        .map(str::trim_end)
        .filter(|line| {
            !line.is_empty() && !line.starts_with("WARNING:") && !line.starts_with('[')
        })
        .collect();

    if content.len() < 2 {
        return Err(Error::Fetcher(format!(
            "unexpected fetcher output format: {raw}"
        )));
    }

    let title = content[0].to_string();
    let video_id = content[1].to_string();
    let url = format!("https://www.youtube.com/watch?v={video_id}");

    Ok(SearchHit {
        video_id,
        title,
        url,
    })
}

/// Extract the percentage from a progress line such as
/// `[download]  42.8% of ~5.23MiB at 1.15MiB/s ETA 00:02`.
pub(crate) fn parse_progress_line(line: &str) -> Option<f64> {
    line.split_whitespace()
        .find_map(|token| token.strip_suffix('%').and_then(|p| p.parse::<f64>().ok()))
}
