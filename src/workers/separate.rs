//! Separation supervisor.
//!
//! Runs the separator inside a long-lived container, bootstrapped exactly
//! once per process. The separator sweeps four internal passes of 0→100 on
//! stderr; those are unified onto a single 0–100 scale before publishing.

use crate::bus::ProgressBus;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{ProgressEvent, Stage, TrackDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const CONTAINER_NAME: &str = "stemsep-demucs";
const CONTAINER_IMAGE: &str = "xserrat/facebook-demucs:latest";
/// Artifact root mount point inside the container.
const CONTAINER_SONGS_DIR: &str = "/songs";
/// Model name; determines the stem output subtree.
pub const SEPARATOR_MODEL: &str = "htdemucs";
/// The separator processes each input in this many passes.
const SEPARATOR_PASSES: u32 = 4;
/// A backward jump of at least this many points marks a new pass.
const PASS_RESET_THRESHOLD: f64 = 50.0;

static ANSI_ESCAPES: Lazy<Regex> =
    Lazy::new(|| Regex::new("\x1b\\[[0-9;]*m").expect("static regex"));
static LEADING_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)%").expect("static regex"));

/// Unifies the separator's per-pass percentages onto one 0–100 scale.
///
/// The separator gives no explicit pass marker; the only signal is the
/// percentage resetting between passes, so a large backward jump is treated
/// as a boundary. State is per invocation and never shared between workers.
#[derive(Debug)]
pub(crate) struct PassTracker {
    current_pass: u32,
    last_percent: f64,
}

impl PassTracker {
    pub fn new() -> Self {
        Self {
            current_pass: 0,
            last_percent: 0.0,
        }
    }

    /// Feed one output segment; returns the unified progress when the
    /// segment carries a percentage.
    pub fn observe(&mut self, segment: &str) -> Option<f64> {
        let clean = ANSI_ESCAPES.replace_all(segment, "");
        let clean = clean.trim();
        if !clean.contains('%') {
            return None;
        }

        let captures = LEADING_PERCENT.captures(clean)?;
        let percent: f64 = captures[1].parse().ok()?;
        if !(0.0..=100.0).contains(&percent) {
            return None;
        }

        if percent < self.last_percent - PASS_RESET_THRESHOLD {
            self.current_pass += 1;
        }
        self.last_percent = percent;

        let mut total = 0.0;
        for pass in 0..SEPARATOR_PASSES {
            if pass < self.current_pass {
                total += 100.0;
            } else if pass == self.current_pass {
                total += percent;
            }
        }
        Some((total / SEPARATOR_PASSES as f64).min(100.0))
    }
}

/// Spawns the separator inside the shared container and maps its progress.
pub struct SeparateSupervisor {
    config: Arc<Config>,
    bus: ProgressBus,
    /// Memoized container bootstrap: success or failure, once per process.
    runtime_init: OnceCell<std::result::Result<(), String>>,
}

impl SeparateSupervisor {
    pub fn new(config: Arc<Config>, bus: ProgressBus) -> Self {
        Self {
            config,
            bus,
            runtime_init: OnceCell::new(),
        }
    }

    /// Separate the downloaded artifact into per-stem files under
    /// `<songs>/<id>/htdemucs/base/`.
    pub async fn run(&self, track: &TrackDescriptor, input_path: &Path) -> Result<()> {
        self.ensure_container().await?;

        let container_input = format!("{CONTAINER_SONGS_DIR}/{}/base.mp3", track.id);
        let container_output = format!("{CONTAINER_SONGS_DIR}/{}", track.id);

        let mut child = Command::new(&self.config.runtime_bin)
            .args(["exec", "-e", "PYTHONUNBUFFERED=1", CONTAINER_NAME])
            .args(["demucs", "--device", "cpu", "-v", "-o"])
            .arg(&container_output)
            .arg(&container_input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Separator(format!("failed to start separator: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Separator("missing stdout pipe".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Separator("missing stderr pipe".into()))?;

        // Progress arrives on stderr; buffer segments may pack several
        // carriage-return separated updates.
        let bus = self.bus.clone();
        let track_id = track.id.clone();
        let progress_task = tokio::spawn(async move {
            let mut tracker = PassTracker::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                for update in line.split('\r') {
                    if update.is_empty() {
                        continue;
                    }
                    if let Some(unified) = tracker.observe(update) {
                        bus.publish(ProgressEvent::active(Stage::Demucs, &track_id, unified))
                            .await;
                    }
                }
            }
        });

        // Stdout only carries runtime chatter, but it must be drained or the
        // child can block on a full pipe.
        let drain_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Separator(format!("failed to wait for separator: {e}")))?;
        let _ = progress_task.await;
        let _ = drain_task.await;

        if !status.success() {
            return Err(Error::Separator(format!(
                "separator exited with {status}"
            )));
        }

        info!(track_id = %track.id, input = %input_path.display(), "separation finished");
        Ok(())
    }

    /// Single-flight container bootstrap shared by all separation workers.
    /// A failed bootstrap is memoized and permanent until process restart.
    async fn ensure_container(&self) -> Result<()> {
        let outcome = self
            .runtime_init
            .get_or_init(|| async {
                start_container(&self.config)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;
        outcome.clone().map_err(Error::Separator)
    }
}

/// Bring up (or reuse) the long-lived separator container with the artifact
/// root bind-mounted inside.
async fn start_container(config: &Config) -> Result<()> {
    let runtime = &config.runtime_bin;

    let listing = Command::new(runtime)
        .args([
            "ps",
            "-a",
            "--filter",
            &format!("name={CONTAINER_NAME}"),
            "--format",
            "{{.Names}}",
        ])
        .output()
        .await
        .map_err(|e| Error::Separator(format!("failed to query container runtime: {e}")))?;
    let exists = String::from_utf8_lossy(&listing.stdout).trim() == CONTAINER_NAME;

    if exists {
        let running = Command::new(runtime)
            .args([
                "ps",
                "--filter",
                &format!("name={CONTAINER_NAME}"),
                "--format",
                "{{.Names}}",
            ])
            .output()
            .await
            .map_err(|e| Error::Separator(format!("failed to query container runtime: {e}")))?;
        let is_running = String::from_utf8_lossy(&running.stdout).trim() == CONTAINER_NAME;

        if is_running {
            debug!("separator container already running");
            return Ok(());
        }

        let status = Command::new(runtime)
            .args(["start", CONTAINER_NAME])
            .status()
            .await
            .map_err(|e| Error::Separator(format!("failed to start container: {e}")))?;
        if !status.success() {
            return Err(Error::Separator(format!(
                "container start exited with {status}"
            )));
        }
        info!("restarted existing separator container");
        return Ok(());
    }

    let status = Command::new(runtime)
        .args(["pull", CONTAINER_IMAGE])
        .status()
        .await
        .map_err(|e| Error::Separator(format!("failed to pull separator image: {e}")))?;
    if !status.success() {
        return Err(Error::Separator(format!(
            "image pull exited with {status}"
        )));
    }

    tokio::fs::create_dir_all(&config.songs_dir).await?;
    let songs_abs = std::fs::canonicalize(&config.songs_dir)?;

    let status = Command::new(runtime)
        .args(["run", "-d", "--name", CONTAINER_NAME, "--entrypoint", "sleep"])
        .arg("-v")
        .arg(format!("{}:{CONTAINER_SONGS_DIR}", songs_abs.display()))
        .arg(CONTAINER_IMAGE)
        // Keeps the unit alive so every job is a cheap exec.
        .arg("infinity")
        .status()
        .await
        .map_err(|e| Error::Separator(format!("failed to create container: {e}")))?;
    if !status.success() {
        return Err(Error::Separator(format!(
            "container create exited with {status}"
        )));
    }

    info!("created separator container {CONTAINER_NAME}");
    Ok(())
}
