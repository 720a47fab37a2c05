//! Two-stage scheduler.
//!
//! Download jobs and separation jobs live on independent bounded queues with
//! their own worker pools, so the separator's resource profile (memory-bound,
//! one at a time) never contends with the download pool. A download worker
//! enqueues the separation job itself on success; there is no completion
//! listener. Startup reconciliation aligns persisted status with the disk
//! before any worker runs.

pub mod fetch;
pub mod separate;

use crate::bus::ProgressBus;
use crate::catalog::CatalogClient;
use crate::config::Config;
use crate::db::tracks as store;
use crate::error::{Error, Result};
use crate::models::{
    FetchJob, ProgressEvent, SeparateJob, SetupPlaylistResponse, Stage, StageStatus,
};
use fetch::FetchSupervisor;
use separate::SeparateSupervisor;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Capacity of each stage queue.
pub const QUEUE_CAPACITY: usize = 1000;

/// Receiving ends of the stage queues. Produced by [`Engine::new`] and
/// consumed by [`Engine::start`]; kept separate so embedders and tests can
/// inspect or drive the queues directly.
pub struct JobQueues {
    pub fetch: mpsc::Receiver<FetchJob>,
    pub separate: mpsc::Receiver<SeparateJob>,
}

/// Top-level coordinator: owns the store handle, the bus, the catalog client
/// and the sending ends of both stage queues.
pub struct Engine {
    db: SqlitePool,
    bus: ProgressBus,
    catalog: Arc<CatalogClient>,
    config: Arc<Config>,
    fetch_tx: mpsc::Sender<FetchJob>,
    separate_tx: mpsc::Sender<SeparateJob>,
}

impl Engine {
    pub fn new(
        db: SqlitePool,
        bus: ProgressBus,
        catalog: Arc<CatalogClient>,
        config: Arc<Config>,
    ) -> (Self, JobQueues) {
        let (fetch_tx, fetch_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (separate_tx, separate_rx) = mpsc::channel(QUEUE_CAPACITY);
        (
            Self {
                db,
                bus,
                catalog,
                config,
                fetch_tx,
                separate_tx,
            },
            JobQueues {
                fetch: fetch_rx,
                separate: separate_rx,
            },
        )
    }

    /// Startup reconciliation; run before [`Engine::start`].
    ///
    /// 1. Disk pass: a present, non-empty artifact forces
    ///    `download_status = completed`; a missing artifact with
    ///    `in_progress` resets to `pending`.
    /// 2. Pending downloads are re-resolved through the catalog (one token
    ///    shared across all lookups) and re-enqueued; individual resolution
    ///    failures are logged and skipped.
    /// 3. Downloaded-but-unseparated tracks are enqueued from stored fields,
    ///    no external lookup needed.
    pub async fn reconcile(&self) -> Result<()> {
        let songs_dir = self.config.songs_dir.clone();
        store::verify_against_disk(&self.db, |track_id| {
            artifact_exists(&songs_dir, track_id)
        })
        .await?;

        let pending = store::pending_fetch(&self.db).await?;
        if !pending.is_empty() {
            info!(count = pending.len(), "re-enqueueing pending downloads");
            // One fetch warms the cache for every resolution below.
            self.catalog.token().await?;

            for track_id in pending {
                match self.catalog.resolve_track(&track_id).await {
                    Ok(track) => self.enqueue_fetch(FetchJob { track }).await?,
                    Err(e) => {
                        warn!(%track_id, error = %e, "failed to re-resolve track; skipping")
                    }
                }
            }
        }

        let unseparated = store::pending_separate(&self.db).await?;
        if !unseparated.is_empty() {
            info!(count = unseparated.len(), "re-enqueueing pending separations");
            for track in unseparated {
                let input_path = self.config.track_audio_path(&track.id);
                self.enqueue_separate(SeparateJob { track, input_path })
                    .await?;
            }
        }

        Ok(())
    }

    /// Resolve a playlist, persist its tracks (insert-if-absent) and enqueue
    /// a download job for every resolved track.
    ///
    /// Already-processed tracks are re-enqueued too; workers check the
    /// current status before acting and skip anything not `pending`.
    pub async fn setup_playlist(&self, playlist_id: &str) -> Result<SetupPlaylistResponse> {
        let metadata = self.catalog.resolve_playlist(playlist_id).await?;

        let mut track_ids = Vec::with_capacity(metadata.tracks.len());
        for track in &metadata.tracks {
            tokio::fs::create_dir_all(self.config.track_dir(&track.id)).await?;
            track_ids.push(track.id.clone());
        }

        store::insert_playlist_tracks(&self.db, playlist_id, &metadata.tracks).await?;

        for track in &metadata.tracks {
            self.enqueue_fetch(FetchJob {
                track: track.clone(),
            })
            .await?;
        }

        info!(
            playlist = %metadata.name,
            tracks = metadata.total_tracks,
            "playlist set up, downloads queued"
        );

        Ok(SetupPlaylistResponse {
            playlist_name: metadata.name,
            total_tracks: metadata.total_tracks,
            track_ids,
        })
    }

    /// Enqueue a download job.
    pub async fn enqueue_fetch(&self, job: FetchJob) -> Result<()> {
        self.fetch_tx
            .send(job)
            .await
            .map_err(|_| Error::Fetcher("download queue is closed".into()))
    }

    /// Enqueue a separation job.
    pub async fn enqueue_separate(&self, job: SeparateJob) -> Result<()> {
        self.separate_tx
            .send(job)
            .await
            .map_err(|_| Error::Separator("separation queue is closed".into()))
    }

    /// Spawn both worker pools.
    ///
    /// Shutdown is by queue closure: dropping the `Engine` drops the senders,
    /// download workers finish their in-flight jobs and exit, and once their
    /// separation senders are gone the separation pool drains and exits too.
    pub fn start(&self, queues: JobQueues) {
        let fetch_rx = Arc::new(Mutex::new(queues.fetch));
        let fetch_supervisor = Arc::new(FetchSupervisor::new(
            self.config.clone(),
            self.bus.clone(),
        ));
        for worker in 0..self.config.fetch_workers {
            tokio::spawn(fetch_worker(
                worker,
                self.db.clone(),
                self.bus.clone(),
                fetch_rx.clone(),
                fetch_supervisor.clone(),
                self.separate_tx.clone(),
            ));
        }
        info!(count = self.config.fetch_workers, "started download workers");

        let separate_rx = Arc::new(Mutex::new(queues.separate));
        let separate_supervisor = Arc::new(SeparateSupervisor::new(
            self.config.clone(),
            self.bus.clone(),
        ));
        for worker in 0..self.config.separate_workers {
            tokio::spawn(separate_worker(
                worker,
                self.db.clone(),
                self.bus.clone(),
                separate_rx.clone(),
                separate_supervisor.clone(),
            ));
        }
        info!(
            count = self.config.separate_workers,
            "started separation workers"
        );
    }
}

/// True when the downloaded artifact exists and is non-empty.
fn artifact_exists(songs_dir: &std::path::Path, track_id: &str) -> bool {
    let path = songs_dir.join(track_id).join("base.mp3");
    std::fs::metadata(path)
        .map(|meta| meta.len() > 0)
        .unwrap_or(false)
}

/// Returns true when the job should be processed: the stage status for the
/// track is still `pending`. Keeps at most one effective job per
/// (track, stage) even though submissions re-enqueue every track.
async fn stage_is_pending(
    db: &SqlitePool,
    track_id: &str,
    stage: Stage,
) -> bool {
    match store::track(db, track_id).await {
        Ok(Some(state)) => {
            let status = match stage {
                Stage::Download => state.download_status,
                Stage::Demucs => state.demucs_status,
            };
            if status != StageStatus::Pending {
                debug!(track_id, ?stage, %status, "skipping job, stage is not pending");
                return false;
            }
            true
        }
        Ok(None) => {
            warn!(track_id, "job for unknown track dropped");
            false
        }
        Err(e) => {
            warn!(track_id, error = %e, "status check failed; skipping job");
            false
        }
    }
}

async fn fetch_worker(
    worker: usize,
    db: SqlitePool,
    bus: ProgressBus,
    rx: Arc<Mutex<mpsc::Receiver<FetchJob>>>,
    supervisor: Arc<FetchSupervisor>,
    separate_tx: mpsc::Sender<SeparateJob>,
) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            debug!(worker, "download queue closed; worker exiting");
            break;
        };
        let track = job.track;

        if !stage_is_pending(&db, &track.id, Stage::Download).await {
            continue;
        }

        info!(worker, track_id = %track.id, name = %track.name,
              artists = %track.artists_joined(), "downloading track");

        bus.publish(ProgressEvent::pending(Stage::Download, &track.id)).await;
        if let Err(e) =
            store::set_fetch_status(&db, &track.id, StageStatus::InProgress, None).await
        {
            warn!(track_id = %track.id, error = %e, "failed to mark download in progress");
        }

        match supervisor.run(&track).await {
            Ok(output_path) => {
                if let Err(e) =
                    store::set_fetch_status(&db, &track.id, StageStatus::Completed, None).await
                {
                    warn!(track_id = %track.id, error = %e, "failed to mark download completed");
                }
                bus.publish(ProgressEvent::completed(Stage::Download, &track.id)).await;

                if separate_tx
                    .send(SeparateJob {
                        track: track.clone(),
                        input_path: output_path,
                    })
                    .await
                    .is_err()
                {
                    warn!(track_id = %track.id, "separation queue closed; job dropped");
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(track_id = %track.id, error = %message, "download failed");
                if let Err(e) =
                    store::set_fetch_status(&db, &track.id, StageStatus::Failed, Some(&message))
                        .await
                {
                    warn!(track_id = %track.id, error = %e, "failed to record download failure");
                }
                bus.publish(ProgressEvent::failed(Stage::Download, &track.id, message)).await;
            }
        }
    }
}

async fn separate_worker(
    worker: usize,
    db: SqlitePool,
    bus: ProgressBus,
    rx: Arc<Mutex<mpsc::Receiver<SeparateJob>>>,
    supervisor: Arc<SeparateSupervisor>,
) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            debug!(worker, "separation queue closed; worker exiting");
            break;
        };
        let track = job.track;

        if !stage_is_pending(&db, &track.id, Stage::Demucs).await {
            continue;
        }

        info!(worker, track_id = %track.id, name = %track.name, "separating track");

        bus.publish(ProgressEvent::pending(Stage::Demucs, &track.id)).await;
        if let Err(e) =
            store::set_separate_status(&db, &track.id, StageStatus::InProgress, None).await
        {
            warn!(track_id = %track.id, error = %e, "failed to mark separation in progress");
        }

        match supervisor.run(&track, &job.input_path).await {
            Ok(()) => {
                if let Err(e) =
                    store::set_separate_status(&db, &track.id, StageStatus::Completed, None).await
                {
                    warn!(track_id = %track.id, error = %e, "failed to mark separation completed");
                }
                bus.publish(ProgressEvent::completed(Stage::Demucs, &track.id)).await;
            }
            Err(e) => {
                let message = e.to_string();
                warn!(track_id = %track.id, error = %message, "separation failed");
                if let Err(e) = store::set_separate_status(
                    &db,
                    &track.id,
                    StageStatus::Failed,
                    Some(&message),
                )
                .await
                {
                    warn!(track_id = %track.id, error = %e, "failed to record separation failure");
                }
                bus.publish(ProgressEvent::failed(Stage::Demucs, &track.id, message)).await;
            }
        }
    }
}
