use anyhow::{Context, Result};
use facegrab_core::FaceExtractor;
use facegrab_store::FaceRegistry;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegrabd starting");

    let config = config::DaemonConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        data_dir = %config.store.data_dir.display(),
        model_dir = %config.store.model_dir.display(),
        threshold = ?config.store.distance_threshold,
        dimension = ?config.store.dimension,
        selection = ?config.store.face_selection,
        "configuration loaded"
    );

    // Load models and open both stores before accepting traffic (fail-fast).
    let extractor = FaceExtractor::load(&config.store.model_dir, config.store.face_selection)
        .context("loading face models")?;
    let registry = FaceRegistry::open(extractor, &config.store).context("opening face stores")?;
    let engine = engine::spawn_engine(registry)?;

    let app = http::create_app(http::AppState { engine }, config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;

    tracing::info!(addr = %config.listen_addr, "facegrabd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("facegrabd shutting down");
    Ok(())
}
