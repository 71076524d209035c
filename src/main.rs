use std::{net::SocketAddr, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use track_shelf::{
    auth::SharedSecret, config::Config, routes, service::TrackService, store::TrackStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load .env first so RUST_LOG can come from it
    dotenvy::dotenv().ok();

    // 2. Initialize Logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,track_shelf=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 3. Load Config
    let config = Config::from_env()?;
    info!("Initializing track server...");

    // 4. Open the Store (sweeps interrupted uploads)
    let store = TrackStore::open(&config.tracks_dir, &config.extension).await?;
    let existing = store.list().await?;
    info!(
        "Serving {} .{} track(s) from {}",
        existing.len(),
        store.extension(),
        store.dir().display()
    );

    let service = TrackService::new(store, Arc::new(SharedSecret::new(config.secret.clone())));

    // 5. Setup Router
    let app = routes::router(service, config.max_upload_bytes);

    // 6. Start Server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Track server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
