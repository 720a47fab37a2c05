//! Track snapshot endpoints.

use crate::db::tracks as store;
use crate::error::{ApiError, ApiResult};
use crate::models::TrackState;
use crate::AppState;
use axum::{
    extract::{Path, State},
    Json,
};

/// GET /tracks - snapshot of every track.
pub async fn list_tracks(State(state): State<AppState>) -> ApiResult<Json<Vec<TrackState>>> {
    let tracks = store::all_tracks(&state.db).await?;
    Ok(Json(tracks))
}

/// GET /tracks/:id - snapshot of one track; 404 when unknown.
pub async fn get_track(
    State(state): State<AppState>,
    Path(track_id): Path<String>,
) -> ApiResult<Json<TrackState>> {
    let track = store::track(&state.db, &track_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("track not found: {track_id}")))?;
    Ok(Json(track))
}
