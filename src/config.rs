//! Environment configuration.
//!
//! Catalog credentials are required and missing values are fatal at startup;
//! everything else has a working default so a bare `SPOTIFY_CLIENT_ID` /
//! `SPOTIFY_CLIENT_SECRET` pair is enough to run.

use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Default HTTP listen port.
const DEFAULT_PORT: u16 = 8080;
/// Default number of parallel download workers.
const DEFAULT_FETCH_WORKERS: usize = 8;
/// Default number of separation workers. The separator is memory-bound;
/// one at a time is intentional.
const DEFAULT_SEPARATE_WORKERS: usize = 1;

/// Runtime configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Catalog API client id (`SPOTIFY_CLIENT_ID`)
    pub client_id: String,
    /// Catalog API client secret (`SPOTIFY_CLIENT_SECRET`)
    pub client_secret: String,
    /// HTTP listen port (`PORT`)
    pub port: u16,
    /// SQLite database file (`STEMSEP_DB`)
    pub db_path: PathBuf,
    /// Artifact root; one subdirectory per track id (`STEMSEP_SONGS_DIR`)
    pub songs_dir: PathBuf,
    /// Download worker pool size (`STEMSEP_FETCH_WORKERS`)
    pub fetch_workers: usize,
    /// Separation worker pool size (`STEMSEP_SEPARATE_WORKERS`)
    pub separate_workers: usize,
    /// Fetcher executable (`STEMSEP_FETCHER_BIN`)
    pub fetcher_bin: String,
    /// Container runtime executable (`STEMSEP_RUNTIME_BIN`)
    pub runtime_bin: String,
}

impl Config {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let client_id = required("SPOTIFY_CLIENT_ID")?;
        let client_secret = required("SPOTIFY_CLIENT_SECRET")?;

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("PORT is not a valid port number: {raw}")))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            client_id,
            client_secret,
            port,
            db_path: PathBuf::from(string_or("STEMSEP_DB", "./queue.db")),
            songs_dir: PathBuf::from(string_or("STEMSEP_SONGS_DIR", "./songs")),
            fetch_workers: count_or("STEMSEP_FETCH_WORKERS", DEFAULT_FETCH_WORKERS)?,
            separate_workers: count_or("STEMSEP_SEPARATE_WORKERS", DEFAULT_SEPARATE_WORKERS)?,
            fetcher_bin: string_or("STEMSEP_FETCHER_BIN", "yt-dlp"),
            runtime_bin: string_or("STEMSEP_RUNTIME_BIN", "docker"),
        })
    }

    /// The per-track artifact directory.
    pub fn track_dir(&self, track_id: &str) -> PathBuf {
        self.songs_dir.join(track_id)
    }

    /// The fixed download output path for a track.
    pub fn track_audio_path(&self, track_id: &str) -> PathBuf {
        self.track_dir(track_id).join("base.mp3")
    }
}

fn required(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::Config(format!(
            "{name} environment variable must be set"
        ))),
    }
}

fn string_or(name: &str, default: &str) -> String {
    env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn count_or(name: &str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<usize>()
            .map_err(|_| Error::Config(format!("{name} is not a valid count: {raw}"))),
        Err(_) => Ok(default),
    }
}
