//! Daemon lifecycle: open the store, start jobs and metrics, serve the API

use anyhow::{bail, Context, Result};
use fbed_core::config::{FbedConfig, ImageConfig};
use fbed_storage::LocalBackend;
use fbed_store::FileService;
use fbed_sync::TokenIssuer;
use prometheus_client::registry::Registry;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::api::{self, AppState};
use crate::metrics::{self, HealthState, Metrics};

pub async fn run(config: FbedConfig) -> Result<()> {
    info!("daemon starting");

    if config.daemon.secret.is_empty() {
        bail!("daemon.secret is not set; peers and clients could not authenticate");
    }

    let backend = LocalBackend::open(&config.storage.root, config.storage.max_hash_limit)
        .await
        .with_context(|| format!("opening store root {}", config.storage.root.display()))?;
    let backend = Arc::new(backend);
    match fbed_storage::check_health(&backend).await {
        Ok(()) => info!(root = %backend.root().display(), "store root: ok"),
        Err(e) => warn!("store root: {e}"),
    }

    let service = FileService::new(backend.clone(), &config)?;
    let service = Arc::new(with_image_hook(service, &config.image)?);

    let mut registry = Registry::default();
    let metrics = Metrics::register(&mut registry);
    let registry = Arc::new(registry);

    // Start Prometheus metrics endpoint
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = HealthState {
            registry: registry.clone(),
            backend: backend.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, state).await {
                error!("metrics server failed: {e:#}");
            }
        });
    }

    let _jobs = crate::jobs::spawn_all(service.clone(), &config, metrics.clone());

    let secret = SecretString::from(config.daemon.secret.clone());
    let state = AppState {
        service,
        tokens: Arc::new(TokenIssuer::for_retries(&secret, config.transport.retry)),
        transport: config.transport.clone(),
        metrics,
    };

    let listener = tokio::net::TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("api bind {}", config.daemon.listen))?;
    info!(addr = %config.daemon.listen, "api: listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("api server")?;

    info!("daemon stopped");
    Ok(())
}

#[cfg(feature = "image")]
fn with_image_hook(service: FileService, image: &ImageConfig) -> Result<FileService> {
    if !image.compress {
        return Ok(service);
    }
    let compressor = fbed_store::ImageCompressor::from_config(image)?;
    info!(format = %image.save_format, "image recompression enabled");
    Ok(service.with_compressor(Arc::new(compressor)))
}

#[cfg(not(feature = "image"))]
fn with_image_hook(service: FileService, image: &ImageConfig) -> Result<FileService> {
    if image.compress {
        warn!("image.compress is set but fbedd was built without the image feature");
    }
    Ok(service)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("installing ctrl-c handler: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
