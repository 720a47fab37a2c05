//! Track store operations: bulk upsert on playlist submission, per-stage
//! status transitions, pending-work queries, snapshot reads and the disk
//! reconciliation pass.

use crate::error::{Error, Result};
use crate::models::{StageStatus, TrackDescriptor, TrackState};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

#[derive(FromRow)]
struct TrackRow {
    track_id: String,
    name: String,
    artists: String,
    download_status: String,
    error_message: Option<String>,
    demucs_status: String,
    demucs_error_message: Option<String>,
}

fn parse_status(raw: &str) -> Result<StageStatus> {
    raw.parse()
        .map_err(|e: String| Error::Database(sqlx::Error::Decode(e.into())))
}

impl TrackRow {
    fn into_state(self) -> Result<TrackState> {
        let download_status = parse_status(&self.download_status)?;
        let demucs_status = parse_status(&self.demucs_status)?;
        Ok(TrackState {
            track_id: self.track_id,
            name: self.name,
            artists: self.artists,
            download_status,
            download_progress: snapshot_progress(download_status),
            download_error: self.error_message,
            demucs_status,
            demucs_progress: snapshot_progress(demucs_status),
            demucs_error: self.demucs_error_message,
        })
    }
}

/// Snapshot progress is derived from status; live percentages are only on
/// the event stream.
fn snapshot_progress(status: StageStatus) -> f64 {
    match status {
        StageStatus::Completed => 100.0,
        _ => 0.0,
    }
}

/// Transactional bulk upsert of tracks and playlist membership.
///
/// Insert-if-absent on both tables: re-submitting a playlist never resets the
/// status of a known track.
pub async fn insert_playlist_tracks(
    pool: &SqlitePool,
    playlist_id: &str,
    tracks: &[TrackDescriptor],
) -> Result<()> {
    if tracks.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    let mut insert_tracks: QueryBuilder<Sqlite> =
        QueryBuilder::new("INSERT INTO tracks (track_id, name, artists, download_status) ");
    insert_tracks.push_values(tracks, |mut row, track| {
        row.push_bind(&track.id)
            .push_bind(&track.name)
            .push_bind(track.artists_joined())
            .push_bind("pending");
    });
    insert_tracks.push(" ON CONFLICT(track_id) DO NOTHING");
    insert_tracks.build().execute(&mut *tx).await?;

    let mut insert_memberships: QueryBuilder<Sqlite> =
        QueryBuilder::new("INSERT INTO playlist_tracks (playlist_id, track_id) ");
    insert_memberships.push_values(tracks, |mut row, track| {
        row.push_bind(playlist_id).push_bind(&track.id);
    });
    insert_memberships.push(" ON CONFLICT(playlist_id, track_id) DO NOTHING");
    insert_memberships.build().execute(&mut *tx).await?;

    tx.commit().await?;
    Ok(())
}

/// Update the download status of a track. The error column is cleared unless
/// a message is supplied (i.e. unless the new status is `failed`).
pub async fn set_fetch_status(
    pool: &SqlitePool,
    track_id: &str,
    status: StageStatus,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE tracks
        SET download_status = ?, error_message = ?, updated_at = CURRENT_TIMESTAMP
        WHERE track_id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(error)
    .bind(track_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Update the separation status of a track; error semantics as for
/// [`set_fetch_status`].
pub async fn set_separate_status(
    pool: &SqlitePool,
    track_id: &str,
    status: StageStatus,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE tracks
        SET demucs_status = ?, demucs_error_message = ?, updated_at = CURRENT_TIMESTAMP
        WHERE track_id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(error)
    .bind(track_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Ids of tracks whose download has not started.
pub async fn pending_fetch(pool: &SqlitePool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT track_id FROM tracks WHERE download_status = 'pending'",
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Tracks that are downloaded but not yet separated, as full descriptors so
/// workers need no second lookup.
pub async fn pending_separate(pool: &SqlitePool) -> Result<Vec<TrackDescriptor>> {
    let rows = sqlx::query_as::<_, (String, String, String)>(
        r#"
        SELECT track_id, name, artists
        FROM tracks
        WHERE download_status = 'completed' AND demucs_status = 'pending'
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, name, artists)| TrackDescriptor {
            id,
            name,
            artists: artists.split(", ").map(str::to_string).collect(),
            album: None,
            duration_ms: None,
            external_url: None,
            release_date: None,
            isrc: None,
        })
        .collect())
}

/// Snapshot of every track.
pub async fn all_tracks(pool: &SqlitePool) -> Result<Vec<TrackState>> {
    let rows = sqlx::query_as::<_, TrackRow>(
        r#"
        SELECT track_id, name, artists,
               download_status, error_message,
               demucs_status, demucs_error_message
        FROM tracks
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TrackRow::into_state).collect()
}

/// Snapshot of a single track, `None` if unknown.
pub async fn track(pool: &SqlitePool, track_id: &str) -> Result<Option<TrackState>> {
    let row = sqlx::query_as::<_, TrackRow>(
        r#"
        SELECT track_id, name, artists,
               download_status, error_message,
               demucs_status, demucs_error_message
        FROM tracks
        WHERE track_id = ?
        "#,
    )
    .bind(track_id)
    .fetch_optional(pool)
    .await?;

    row.map(TrackRow::into_state).transpose()
}

/// Reconcile persisted download status against on-disk artifacts.
///
/// `exists` reports whether a non-empty downloaded artifact is present for a
/// track id. Present artifact with a non-completed status becomes
/// `completed`; a missing artifact with `in_progress` (a crash mid-download)
/// is reset to `pending`.
pub async fn verify_against_disk<F>(pool: &SqlitePool, exists: F) -> Result<()>
where
    F: Fn(&str) -> bool,
{
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT track_id, download_status FROM tracks",
    )
    .fetch_all(pool)
    .await?;

    for (track_id, status) in rows {
        if exists(&track_id) {
            if status != "completed" {
                set_fetch_status(pool, &track_id, StageStatus::Completed, None).await?;
                tracing::info!(%track_id, "verified completed download on disk");
            }
        } else if status == "in_progress" {
            set_fetch_status(pool, &track_id, StageStatus::Pending, None).await?;
            tracing::info!(%track_id, "reset interrupted download");
        }
    }

    Ok(())
}
