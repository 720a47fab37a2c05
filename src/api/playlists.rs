//! Playlist setup endpoint.

use crate::error::{ApiError, ApiResult};
use crate::models::{SetupPlaylistRequest, SetupPlaylistResponse};
use crate::AppState;
use axum::{extract::State, Json};

/// POST /setup-playlist - resolve a playlist, persist its tracks and queue
/// downloads. Responds as soon as the jobs are queued.
pub async fn setup_playlist(
    State(state): State<AppState>,
    Json(request): Json<SetupPlaylistRequest>,
) -> ApiResult<Json<SetupPlaylistResponse>> {
    if request.playlist_id.is_empty() {
        return Err(ApiError::BadRequest("playlist_id is required".into()));
    }

    let response = state.engine.setup_playlist(&request.playlist_id).await?;
    Ok(Json(response))
}
