use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use veriface_core::OnnxEmbedder;
use veriface_store::{FaceIndex, GalleryStore};

mod config;
mod engine;
mod server;

use config::Config;
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        listen = %config.listen_addr,
        images_dir = %config.images_dir.display(),
        model_dir = %config.model_dir.display(),
        threshold = config.match_threshold,
        "verifaced starting"
    );

    let store = Arc::new(GalleryStore::open(&config.images_dir, &config.db_path)?);
    let index = Arc::new(FaceIndex::new());

    // Fail fast: without models there is nothing to serve.
    let embedder = OnnxEmbedder::load(&config.model_dir)?;
    let engine = engine::spawn_engine(
        Box::new(embedder),
        store.clone(),
        index.clone(),
        Duration::from_secs(config.embed_timeout_secs),
    );

    // Initial index build is best-effort: a stale or empty index beats
    // refusing to start, and the operator can retrigger via /reload.
    match engine.rebuild().await {
        Ok(stats) => tracing::info!(
            images = stats.images,
            faces = stats.faces,
            reused = stats.reused,
            "initial index built"
        ),
        Err(e) => tracing::error!(error = %e, "initial index build failed; serving empty index"),
    }

    let state = AppState::new(store, index, engine, config.match_threshold);
    let app = server::create_app(state, config.max_upload_mb * 1024 * 1024);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "verifaced ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("verifaced shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
