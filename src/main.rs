use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use stemsep::catalog::{CatalogClient, CatalogEndpoints, ClientCredentials};
use stemsep::config::Config;
use stemsep::workers::Engine;
use stemsep::{build_router, bus::ProgressBus, db, AppState};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("starting stemsep");
    info!("version: {}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::from_env()?);
    std::fs::create_dir_all(&config.songs_dir)?;

    let db = db::connect(&config.db_path).await?;
    info!("database connection established: {}", config.db_path.display());

    let bus = ProgressBus::new();

    let catalog = Arc::new(CatalogClient::new(
        ClientCredentials {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        },
        CatalogEndpoints::default(),
    ));

    let (engine, queues) = Engine::new(db.clone(), bus.clone(), catalog, config.clone());
    let engine = Arc::new(engine);

    info!("reconciling persisted state against disk");
    if let Err(e) = engine.reconcile().await {
        warn!("reconciliation incomplete: {e}");
    }

    engine.start(queues);

    let state = AppState::new(db, bus, engine, config.clone());
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
