//! HTTP gateway: thin translation of requests onto engine operations plus
//! the progress event stream and the static artifact tree.

mod playlists;
mod sse;
mod tracks;

use crate::AppState;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, services::ServeDir};

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let songs_dir = state.config.songs_dir.clone();

    Router::new()
        .route("/setup-playlist", post(playlists::setup_playlist))
        .route("/tracks", get(tracks::list_tracks))
        .route("/tracks/:id", get(tracks::get_track))
        .route("/progress/stream", get(sse::progress_stream))
        .route("/health", get(health))
        // Artifact tree; layout is a compatibility contract with clients.
        .nest_service("/songs", ServeDir::new(songs_dir))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// GET /health - liveness check
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "stemsep",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
