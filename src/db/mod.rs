//! Database access.
//!
//! A single SQLite file holds the track table and playlist membership.
//! Schema creation and the add-column migrations are idempotent so a pool can
//! be opened against any prior version of the file.

pub mod tracks;

use crate::error::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (creating if necessary) the database and bring the schema current.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_schema(&pool).await?;

    Ok(pool)
}

/// Create tables and indices, then apply idempotent migrations.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            track_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            artists TEXT NOT NULL,
            download_status TEXT NOT NULL,
            error_message TEXT,
            demucs_status TEXT DEFAULT 'pending',
            demucs_error_message TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS playlist_tracks (
            playlist_id TEXT NOT NULL,
            track_id TEXT NOT NULL,
            PRIMARY KEY (playlist_id, track_id),
            FOREIGN KEY (track_id) REFERENCES tracks(track_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_download_status ON tracks(download_status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_demucs_status ON tracks(demucs_status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_playlist_id ON playlist_tracks(playlist_id)")
        .execute(pool)
        .await?;

    // Migrations for databases created before the separation stage existed.
    // Failures mean the column is already present.
    let migrations = [
        "ALTER TABLE tracks ADD COLUMN demucs_status TEXT DEFAULT 'pending'",
        "ALTER TABLE tracks ADD COLUMN demucs_error_message TEXT",
    ];
    for migration in migrations {
        if sqlx::query(migration).execute(pool).await.is_err() {
            tracing::debug!("migration already applied: {}", migration);
        }
    }

    tracing::info!("database schema initialized");
    Ok(())
}
