//! Shared data types: catalog descriptors, persisted track state, progress
//! events and in-flight job descriptors.
//!
//! The JSON field names on `TrackState`, `ProgressEvent` and the setup
//! request/response are a compatibility contract with existing clients and
//! must not change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Per-stage lifecycle status as persisted in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "in_progress" => Ok(StageStatus::InProgress),
            "completed" => Ok(StageStatus::Completed),
            "failed" => Ok(StageStatus::Failed),
            other => Err(format!("unknown stage status: {other}")),
        }
    }
}

/// Track metadata as resolved from the catalog API.
///
/// Only `id`, `name` and the joined artist string are persisted; the
/// remaining fields ride along for logging and future use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
}

impl TrackDescriptor {
    /// Display / persistence form of the artist list.
    pub fn artists_joined(&self) -> String {
        self.artists.join(", ")
    }

    /// Search-query form of the artist list.
    pub fn artists_for_search(&self) -> String {
        self.artists.join(" ")
    }
}

/// A resolved playlist: name plus its ordered tracks.
#[derive(Debug, Clone)]
pub struct PlaylistMetadata {
    pub name: String,
    pub total_tracks: i64,
    pub tracks: Vec<TrackDescriptor>,
}

/// Snapshot of a track's persisted state, served by `/tracks`.
///
/// Snapshot progress is derived: 100 when the stage is completed, otherwise
/// 0. Live percentages come from the event stream, not from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackState {
    pub track_id: String,
    pub name: String,
    pub artists: String,
    pub download_status: StageStatus,
    pub download_progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_error: Option<String>,
    pub demucs_status: StageStatus,
    pub demucs_progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demucs_error: Option<String>,
}

/// Pipeline stage, in wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Download,
    Demucs,
}

/// Status carried on a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
}

/// A transient progress update, broadcast to SSE subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub track_id: String,
    #[serde(rename = "type")]
    pub stage: Stage,
    pub status: EventStatus,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn pending(stage: Stage, track_id: &str) -> Self {
        Self {
            track_id: track_id.to_string(),
            stage,
            status: EventStatus::Pending,
            progress: 0.0,
            error: None,
        }
    }

    /// An in-flight update; the wire status depends on the stage.
    pub fn active(stage: Stage, track_id: &str, progress: f64) -> Self {
        let status = match stage {
            Stage::Download => EventStatus::Downloading,
            Stage::Demucs => EventStatus::Processing,
        };
        Self {
            track_id: track_id.to_string(),
            stage,
            status,
            progress,
            error: None,
        }
    }

    pub fn completed(stage: Stage, track_id: &str) -> Self {
        Self {
            track_id: track_id.to_string(),
            stage,
            status: EventStatus::Completed,
            progress: 100.0,
            error: None,
        }
    }

    pub fn failed(stage: Stage, track_id: &str, error: String) -> Self {
        Self {
            track_id: track_id.to_string(),
            stage,
            status: EventStatus::Failed,
            progress: 0.0,
            error: Some(error),
        }
    }
}

/// In-flight download job.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub track: TrackDescriptor,
}

/// In-flight separation job; carries the fetched artifact path.
#[derive(Debug, Clone)]
pub struct SeparateJob {
    pub track: TrackDescriptor,
    pub input_path: PathBuf,
}

/// Request body for `POST /setup-playlist`.
#[derive(Debug, Deserialize)]
pub struct SetupPlaylistRequest {
    #[serde(default)]
    pub playlist_id: String,
}

/// Response body for `POST /setup-playlist`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SetupPlaylistResponse {
    pub playlist_name: String,
    pub total_tracks: i64,
    pub track_ids: Vec<String>,
}
