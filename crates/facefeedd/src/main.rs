use anyhow::{Context, Result};
use facefeed_core::{CatalogStore, FaceGateway, OnnxGateway};
use facefeed_hw::Camera;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod feed;
mod http;
mod pipeline;
mod pool;
mod state;

use config::Config;
use pipeline::{Pipeline, PipelineOptions, PipelineStatus};
use state::RecognitionState;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facefeedd starting");

    let config = Config::from_env();
    tracing::info!(
        camera = %config.camera_device,
        store = %config.store,
        cache = %config.cache_path.display(),
        threshold = config.threshold,
        policy = ?config.match_policy,
        workers = config.workers,
        "configuration loaded"
    );

    // Models load synchronously; keep that off the runtime threads.
    let scrfd = config.scrfd_model_path();
    let arcface = config.arcface_model_path();
    let sessions = config.sessions;
    let gateway: Arc<dyn FaceGateway> = Arc::new(
        tokio::task::spawn_blocking(move || OnnxGateway::load(&scrfd, &arcface, sessions))
            .await
            .context("model loading task failed")?
            .context("failed to load face models")?,
    );
    tracing::info!(sessions, "face models loaded");

    let store = config
        .store
        .open(config.store_token.clone())
        .context("failed to open object store")?;
    let catalogs = CatalogStore::new(store, &config.cache_path)
        .with_catalog_key(config.catalog_key.clone())
        .with_people_prefix(config.people_prefix.clone());
    let catalog = Arc::new(catalogs.load_or_bootstrap(gateway.clone()).await);
    tracing::info!(
        identities = catalog.len(),
        references = catalog.reference_count(),
        "catalog ready"
    );

    let recognition = Arc::new(RecognitionState::new());
    let status = Arc::new(PipelineStatus::default());
    let (pipeline, frames) = Pipeline::new(
        gateway,
        catalog.clone(),
        recognition.clone(),
        status.clone(),
        PipelineOptions::from(&config),
    )
    .context("failed to start worker pool")?;

    // Without a camera the video feed ends at once; status and health stay up.
    match Camera::open(&config.camera_device, CAPTURE_WIDTH, CAPTURE_HEIGHT) {
        Ok(camera) => {
            pipeline
                .with_matcher(config.match_policy.matcher())
                .spawn(camera)
                .context("failed to spawn pipeline thread")?;
        }
        Err(e) => {
            tracing::error!(
                device = %config.camera_device,
                error = %e,
                stage = "capture",
                "failed to open camera, serving without video"
            );
            pipeline.stop();
        }
    }

    let app = http::router(Arc::new(http::AppState {
        frames,
        recognition,
        pipeline: status,
        identities: catalog.len(),
        threshold: config.threshold,
        status_interval: config.status_interval,
    }));

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.bind, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, "facefeedd ready");

    // Feeds stream forever, so shut down on the signal rather than draining.
    tokio::select! {
        result = axum::serve(listener, app).into_future() => result.context("server error")?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("facefeedd shutting down");
        }
    }

    Ok(())
}
