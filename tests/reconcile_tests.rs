//! Startup reconciliation: disk state wins over persisted status, interrupted
//! work is re-queued and completed work is left alone.

mod helpers;

use helpers::{seed_track, spawn_catalog_stub, test_config, test_pool, track_json};
use std::sync::Arc;
use stemsep::bus::ProgressBus;
use stemsep::catalog::{CatalogClient, ClientCredentials};
use stemsep::config::Config;
use stemsep::db::tracks as store;
use stemsep::models::StageStatus;
use stemsep::workers::{Engine, JobQueues};
use tempfile::TempDir;

fn write_artifact(config: &Config, track_id: &str) {
    let dir = config.track_dir(track_id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("base.mp3"), b"audio bytes").unwrap();
}

async fn engine_with_stub(
    dir: &TempDir,
    stub: &helpers::CatalogStub,
) -> (Engine, JobQueues, sqlx::SqlitePool, Arc<Config>) {
    let pool = test_pool(dir.path()).await;
    let config = Arc::new(test_config(dir.path()));
    let catalog = Arc::new(CatalogClient::new(
        ClientCredentials {
            client_id: "test-client".into(),
            client_secret: "test-secret".into(),
        },
        stub.endpoints(),
    ));
    let (engine, queues) = Engine::new(pool.clone(), ProgressBus::new(), catalog, config.clone());
    (engine, queues, pool, config)
}

#[tokio::test]
async fn artifact_on_disk_marks_download_completed_without_requeue() {
    let dir = TempDir::new().unwrap();
    let stub = spawn_catalog_stub(3600).await;
    let (engine, mut queues, pool, config) = engine_with_stub(&dir, &stub).await;

    seed_track(&pool, "X", "in_progress", "pending").await;
    write_artifact(&config, "X");

    engine.reconcile().await.unwrap();

    let state = store::track(&pool, "X").await.unwrap().unwrap();
    assert_eq!(state.download_status, StageStatus::Completed);

    // No fetch job was enqueued for X.
    assert!(queues.fetch.try_recv().is_err(), "fetch queue must be empty");

    // The completed-but-unseparated track is queued for separation instead.
    let job = queues.separate.try_recv().expect("separation job queued");
    assert_eq!(job.track.id, "X");
    assert_eq!(job.input_path, config.track_audio_path("X"));
}

#[tokio::test]
async fn interrupted_download_is_reset_and_requeued() {
    let dir = TempDir::new().unwrap();
    let stub = spawn_catalog_stub(3600).await;
    stub.add_track("Y", track_json("Y", "Yonder", &["Artist"]));
    let (engine, mut queues, pool, _config) = engine_with_stub(&dir, &stub).await;

    seed_track(&pool, "Y", "in_progress", "pending").await;
    // No artifact on disk: the prior run crashed mid-download.

    engine.reconcile().await.unwrap();

    let state = store::track(&pool, "Y").await.unwrap().unwrap();
    assert_eq!(state.download_status, StageStatus::Pending);

    let job = queues.fetch.try_recv().expect("fetch job re-queued");
    assert_eq!(job.track.id, "Y");
    assert_eq!(job.track.name, "Yonder", "descriptor re-resolved from catalog");
    assert!(queues.separate.try_recv().is_err());
}

#[tokio::test]
async fn unresolvable_track_is_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let stub = spawn_catalog_stub(3600).await;
    stub.add_track("OK", track_json("OK", "Fine", &["Artist"]));
    // "GONE" is not registered with the stub, so resolution 404s.
    let (engine, mut queues, pool, _config) = engine_with_stub(&dir, &stub).await;

    seed_track(&pool, "GONE", "pending", "pending").await;
    seed_track(&pool, "OK", "pending", "pending").await;

    engine.reconcile().await.unwrap();

    let mut queued = Vec::new();
    while let Ok(job) = queues.fetch.try_recv() {
        queued.push(job.track.id);
    }
    assert_eq!(queued, vec!["OK".to_string()], "only the resolvable track queued");
}

#[tokio::test]
async fn reconciliation_shares_one_token_fetch() {
    let dir = TempDir::new().unwrap();
    let stub = spawn_catalog_stub(3600).await;
    stub.add_track("A", track_json("A", "Aaa", &["X"]));
    stub.add_track("B", track_json("B", "Bbb", &["Y"]));
    stub.add_track("C", track_json("C", "Ccc", &["Z"]));
    let (engine, _queues, pool, _config) = engine_with_stub(&dir, &stub).await;

    for id in ["A", "B", "C"] {
        seed_track(&pool, id, "pending", "pending").await;
    }

    engine.reconcile().await.unwrap();
    assert_eq!(stub.token_hits(), 1, "one credential fetch for the whole resync");
}
