//! Shared test utilities: temp databases, a stub catalog server and stub
//! subprocess executables.

#![allow(dead_code)]

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stemsep::bus::Subscription;
use stemsep::catalog::CatalogEndpoints;
use stemsep::config::Config;
use stemsep::models::{ProgressEvent, TrackDescriptor};

/// Open a file-backed database inside `dir` with the schema applied.
pub async fn test_pool(dir: &Path) -> SqlitePool {
    let db_path = dir.join("test.db");
    stemsep::db::connect(&db_path).await.expect("test db")
}

/// A configuration pointing every external dependency into the test sandbox.
pub fn test_config(dir: &Path) -> Config {
    Config {
        client_id: "test-client".into(),
        client_secret: "test-secret".into(),
        port: 0,
        db_path: dir.join("test.db"),
        songs_dir: dir.join("songs"),
        fetch_workers: 2,
        separate_workers: 1,
        fetcher_bin: "/nonexistent/fetcher".into(),
        runtime_bin: "/nonexistent/runtime".into(),
    }
}

pub fn descriptor(id: &str, name: &str, artists: &[&str]) -> TrackDescriptor {
    TrackDescriptor {
        id: id.into(),
        name: name.into(),
        artists: artists.iter().map(|a| a.to_string()).collect(),
        album: None,
        duration_ms: None,
        external_url: None,
        release_date: None,
        isrc: None,
    }
}

/// Insert a track row with explicit stage statuses.
pub async fn seed_track(
    pool: &SqlitePool,
    id: &str,
    download_status: &str,
    demucs_status: &str,
) {
    sqlx::query(
        "INSERT INTO tracks (track_id, name, artists, download_status, demucs_status) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(format!("Track {id}"))
    .bind("Some Artist")
    .bind(download_status)
    .bind(demucs_status)
    .execute(pool)
    .await
    .expect("seed track");
}

// ---------------------------------------------------------------------------
// Stub catalog server
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct CatalogStubState {
    pub token_hits: Arc<AtomicUsize>,
    pub expires_in: u64,
    pub playlists: Arc<Mutex<HashMap<String, Value>>>,
    pub pages: Arc<Mutex<HashMap<String, Value>>>,
    pub tracks: Arc<Mutex<HashMap<String, Value>>>,
}

pub struct CatalogStub {
    pub base: String,
    pub state: CatalogStubState,
}

impl CatalogStub {
    pub fn endpoints(&self) -> CatalogEndpoints {
        CatalogEndpoints {
            auth_url: format!("{}/api/token", self.base),
            api_base: format!("{}/v1", self.base),
        }
    }

    pub fn page_url(&self, key: &str) -> String {
        format!("{}/v1/pages/{key}", self.base)
    }

    pub fn add_playlist(&self, id: &str, body: Value) {
        self.state.playlists.lock().unwrap().insert(id.into(), body);
    }

    pub fn add_page(&self, key: &str, body: Value) {
        self.state.pages.lock().unwrap().insert(key.into(), body);
    }

    pub fn add_track(&self, id: &str, body: Value) {
        self.state.tracks.lock().unwrap().insert(id.into(), body);
    }

    pub fn token_hits(&self) -> usize {
        self.state.token_hits.load(Ordering::SeqCst)
    }
}

async fn stub_token(State(state): State<CatalogStubState>) -> Json<Value> {
    let n = state.token_hits.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "access_token": format!("tok-{n}"),
        "token_type": "Bearer",
        "expires_in": state.expires_in,
    }))
}

fn lookup(map: &Mutex<HashMap<String, Value>>, key: &str) -> impl IntoResponse {
    match map.lock().unwrap().get(key) {
        Some(body) => (StatusCode::OK, Json(body.clone())).into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

/// Spawn a local catalog API stub; `expires_in` is the token lifetime it
/// reports.
pub async fn spawn_catalog_stub(expires_in: u64) -> CatalogStub {
    let state = CatalogStubState {
        expires_in,
        ..Default::default()
    };

    let router = Router::new()
        .route("/api/token", post(stub_token))
        .route(
            "/v1/playlists/:id",
            get(|State(state): State<CatalogStubState>, AxumPath(id): AxumPath<String>| async move {
                lookup(&state.playlists, &id)
            }),
        )
        .route(
            "/v1/pages/:key",
            get(|State(state): State<CatalogStubState>, AxumPath(key): AxumPath<String>| async move {
                lookup(&state.pages, &key)
            }),
        )
        .route(
            "/v1/tracks/:id",
            get(|State(state): State<CatalogStubState>, AxumPath(id): AxumPath<String>| async move {
                lookup(&state.tracks, &id)
            }),
        )
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub catalog");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub catalog");
    });

    CatalogStub {
        base: format!("http://{addr}"),
        state,
    }
}

pub fn track_json(id: &str, name: &str, artists: &[&str]) -> Value {
    json!({
        "id": id,
        "name": name,
        "artists": artists.iter().map(|a| json!({"name": a})).collect::<Vec<_>>(),
    })
}

pub fn playlist_json(name: &str, total: i64, tracks: &[Value], next: Option<&str>) -> Value {
    json!({
        "name": name,
        "tracks": {
            "items": tracks.iter().map(|t| json!({"track": t})).collect::<Vec<_>>(),
            "next": next,
            "total": total,
        }
    })
}

pub fn page_json(tracks: &[Value], next: Option<&str>) -> Value {
    json!({
        "items": tracks.iter().map(|t| json!({"track": t})).collect::<Vec<_>>(),
        "next": next,
    })
}

// ---------------------------------------------------------------------------
// Stub subprocess executables
// ---------------------------------------------------------------------------

/// Write an executable shell script into `dir`.
pub fn write_stub(dir: &Path, name: &str, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, script).expect("write stub");
    let mut perms = std::fs::metadata(&path).expect("stub metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod stub");
    path
}

/// A fetcher stub: search mode returns a fixed hit; download mode prints the
/// literal progress lines and creates the output file.
pub fn fetcher_stub(dir: &Path) -> PathBuf {
    write_stub(
        dir,
        "fetcher-stub",
        r#"#!/bin/sh
case "$*" in
  *--get-id*)
    echo "Stub Title"
    echo "vid123"
    exit 0
    ;;
esac
out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  prev="$arg"
done
echo "[download]   0.0% of 1MiB"
echo "[download]  50.0% of 1MiB"
echo "[download] 100.0% of 1MiB"
if [ -n "$out" ]; then
  mkdir -p "$(dirname "$out")"
  echo audio > "$out"
fi
exit 0
"#,
    )
}

/// A fetcher stub that always fails with "not found" on stderr.
pub fn failing_fetcher_stub(dir: &Path) -> PathBuf {
    write_stub(
        dir,
        "fetcher-fail-stub",
        r#"#!/bin/sh
echo "ERROR: not found" >&2
exit 1
"#,
    )
}

/// A container runtime stub: reports the container as present and running,
/// and emits the four-pass separator progress on stderr for `exec`. Stem
/// files are created under `$STEMSEP_STUB_SONGS` when set.
pub fn runtime_stub(dir: &Path) -> PathBuf {
    write_stub(
        dir,
        "runtime-stub",
        r#"#!/bin/sh
case "$1" in
  ps)
    echo "stemsep-demucs"
    exit 0
    ;;
  exec)
    for arg in "$@"; do last="$arg"; done
    rel="${last#/songs/}"
    id="${rel%%/*}"
    if [ -n "$STEMSEP_STUB_SONGS" ] && [ -n "$id" ]; then
      stems="$STEMSEP_STUB_SONGS/$id/htdemucs/base"
      mkdir -p "$stems"
      for stem in vocals drums bass other; do : > "$stems/$stem.wav"; done
    fi
    printf '  0%%\r 50%%\r100%%\r  0%%\r100%%\r  0%%\r100%%\r  0%%\r100%%\n' >&2
    exit 0
    ;;
esac
exit 0
"#,
    )
}

// ---------------------------------------------------------------------------
// Event collection
// ---------------------------------------------------------------------------

/// Collect events until `stop` matches one or the timeout elapses; the
/// matching event is included.
pub async fn collect_until<F>(
    subscription: &mut Subscription,
    timeout: Duration,
    mut stop: F,
) -> Vec<ProgressEvent>
where
    F: FnMut(&ProgressEvent) -> bool,
{
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        match tokio::time::timeout(deadline - now, subscription.recv()).await {
            Ok(Some(event)) => {
                let done = stop(&event);
                events.push(event);
                if done {
                    break;
                }
            }
            _ => break,
        }
    }
    events
}
