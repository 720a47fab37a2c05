//! stemsep - playlist download and stem-separation pipeline server.
//!
//! A submitted catalog playlist is resolved into tracks; each track is
//! downloaded through an external fetcher, then split into per-stem audio by
//! a separator running in a long-lived container. Progress streams to any
//! number of SSE subscribers and all state survives restarts through SQLite
//! plus startup reconciliation against the artifact tree.

pub mod api;
pub mod bus;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod workers;

use bus::ProgressBus;
use config::Config;
use sqlx::SqlitePool;
use std::sync::Arc;
use workers::Engine;

pub use api::build_router;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Progress fan-out bus
    pub bus: ProgressBus,
    /// Pipeline engine
    pub engine: Arc<Engine>,
    /// Runtime configuration
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: SqlitePool, bus: ProgressBus, engine: Arc<Engine>, config: Arc<Config>) -> Self {
        Self {
            db,
            bus,
            engine,
            config,
        }
    }
}
