//! Catalog API client.
//!
//! Authenticates with the client-credentials flow, caches the bearer token
//! (see [`token`]), and resolves playlists (following pagination) and single
//! tracks into [`TrackDescriptor`]s.

mod token;

use crate::error::{Error, Result};
use crate::models::{PlaylistMetadata, TrackDescriptor};
use serde::Deserialize;
use std::time::Duration;
use token::{cached, CachedToken, TokenCell};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client-credentials pair for the catalog API.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Endpoint bases; overridable so tests can point at a stub server.
#[derive(Debug, Clone)]
pub struct CatalogEndpoints {
    /// Token endpoint (client-credentials grant)
    pub auth_url: String,
    /// REST base, e.g. `https://api.spotify.com/v1`
    pub api_base: String,
}

impl Default for CatalogEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.spotify.com/api/token".to_string(),
            api_base: "https://api.spotify.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: Option<String>,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct PlaylistResponse {
    name: String,
    tracks: PlaylistTracksPage,
}

#[derive(Debug, Deserialize)]
struct PlaylistTracksPage {
    items: Vec<PlaylistItem>,
    next: Option<String>,
    total: i64,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: String,
    name: String,
    #[serde(default)]
    duration_ms: Option<i64>,
    #[serde(default)]
    external_urls: Option<ExternalUrls>,
    #[serde(default)]
    external_ids: Option<ExternalIds>,
    #[serde(default)]
    artists: Vec<ArtistObject>,
    #[serde(default)]
    album: Option<AlbumObject>,
}

#[derive(Debug, Deserialize)]
struct ExternalUrls {
    #[serde(default)]
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    #[serde(default)]
    isrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtistObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumObject {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
}

impl TrackObject {
    fn into_descriptor(self) -> TrackDescriptor {
        let (album, release_date) = match self.album {
            Some(album) => (album.name, album.release_date),
            None => (None, None),
        };
        TrackDescriptor {
            id: self.id,
            name: self.name,
            artists: self.artists.into_iter().map(|a| a.name).collect(),
            album,
            duration_ms: self.duration_ms,
            external_url: self.external_urls.and_then(|u| u.spotify),
            release_date,
            isrc: self.external_ids.and_then(|i| i.isrc),
        }
    }
}

/// HTTP client for the catalog API with a cached bearer token.
pub struct CatalogClient {
    http: reqwest::Client,
    credentials: ClientCredentials,
    endpoints: CatalogEndpoints,
    token: TokenCell,
}

impl CatalogClient {
    pub fn new(credentials: ClientCredentials, endpoints: CatalogEndpoints) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            credentials,
            endpoints,
            token: TokenCell::default(),
        }
    }

    /// Return a currently-valid bearer token, refreshing at most once across
    /// concurrent callers.
    pub async fn token(&self) -> Result<String> {
        if let Some(token) = cached(&self.token).await {
            return Ok(token);
        }

        let mut guard = self.token.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(existing) = guard.as_ref() {
            if existing.is_fresh() {
                return Ok(existing.token.clone());
            }
        }

        let grant = self.request_token().await?;
        let refresh_at = chrono::Utc::now()
            + chrono::Duration::seconds(
                grant.expires_in.saturating_sub(token::EXPIRY_SKEW.as_secs()) as i64,
            );
        tracing::info!(
            expires_in = grant.expires_in,
            refresh_at = %refresh_at.to_rfc3339(),
            "fetched new catalog access token"
        );
        let fresh = CachedToken::new(grant.access_token, Duration::from_secs(grant.expires_in));
        let token = fresh.token.clone();
        *guard = Some(fresh);
        Ok(token)
    }

    async fn request_token(&self) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.endpoints.auth_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Catalog(format!(
                "token request failed with status {status}: {body}"
            )));
        }

        Ok(response.json().await?)
    }

    /// Resolve a playlist to its name, total and ordered tracks, following
    /// pagination links until exhausted.
    pub async fn resolve_playlist(&self, playlist_id: &str) -> Result<PlaylistMetadata> {
        let token = self.token().await?;
        let url = format!("{}/playlists/{}", self.endpoints.api_base, playlist_id);
        let first: PlaylistResponse = self.get_json(&url, &token).await?;

        let mut metadata = PlaylistMetadata {
            name: first.name,
            total_tracks: first.tracks.total,
            tracks: Vec::with_capacity(first.tracks.total.max(0) as usize),
        };
        collect_tracks(&mut metadata.tracks, first.tracks.items);

        let mut next_url = first.tracks.next;
        while let Some(url) = next_url {
            let page: TracksPageResponse = self.get_json(&url, &token).await?;
            collect_tracks(&mut metadata.tracks, page.items);
            next_url = page.next;
        }

        Ok(metadata)
    }

    /// Resolve a single track id to its descriptor.
    pub async fn resolve_track(&self, track_id: &str) -> Result<TrackDescriptor> {
        let token = self.token().await?;
        let url = format!("{}/tracks/{}", self.endpoints.api_base, track_id);
        let track: TrackObject = self.get_json(&url, &token).await?;
        Ok(track.into_descriptor())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
    ) -> Result<T> {
        let response = self.http.get(url).bearer_auth(token).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Catalog(format!(
                "request to {url} failed with status {status}: {body}"
            )));
        }

        Ok(response.json().await?)
    }
}

/// Continuation pages carry the track page fields at the top level.
#[derive(Debug, Deserialize)]
struct TracksPageResponse {
    items: Vec<PlaylistItem>,
    next: Option<String>,
}

fn collect_tracks(out: &mut Vec<TrackDescriptor>, items: Vec<PlaylistItem>) {
    out.extend(
        items
            .into_iter()
            .filter_map(|item| item.track)
            .map(TrackObject::into_descriptor),
    );
}
