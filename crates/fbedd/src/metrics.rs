//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  — Prometheus text format
//!   GET /healthz  — Liveness probe (always 200 if process is running)
//!   GET /readyz   — Readiness probe (200 if the store root is usable)

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use fbed_core::SyncReport;
use fbed_storage::LocalBackend;
use prometheus_client::{encoding::text::encode, metrics::counter::Counter, registry::Registry};
use std::sync::Arc;

/// Counters updated by the API handlers and the scheduled jobs
#[derive(Clone, Default)]
pub struct Metrics {
    pub files_added: Counter,
    pub files_removed: Counter,
    pub trash_purged: Counter,
    pub sync_transferred: Counter,
    pub sync_failed: Counter,
}

impl Metrics {
    pub fn register(registry: &mut Registry) -> Self {
        let m = Metrics::default();
        registry.register(
            "fbed_files_added",
            "Files stored through add, url ingest or peer push",
            m.files_added.clone(),
        );
        registry.register(
            "fbed_files_removed",
            "Files removed through the API",
            m.files_removed.clone(),
        );
        registry.register(
            "fbed_trash_purged",
            "Trashed files purged by the retention sweep",
            m.trash_purged.clone(),
        );
        registry.register(
            "fbed_sync_transferred",
            "Files transferred by push and pull",
            m.sync_transferred.clone(),
        );
        registry.register(
            "fbed_sync_failed",
            "Per-file failures during push and pull",
            m.sync_failed.clone(),
        );
        m
    }

    pub fn record_sync(&self, report: &SyncReport) {
        self.sync_transferred.inc_by(report.transferred as u64);
        self.sync_failed.inc_by(report.failed as u64);
    }
}

/// Shared health state
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub backend: Arc<LocalBackend>,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9100")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("metrics bind {addr}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, router(state))
        .await
        .context("metrics server")
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match fbed_storage::check_health(&state.backend).await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "store root unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn state(dir: &std::path::Path) -> (HealthState, Metrics) {
        let mut registry = Registry::default();
        let metrics = Metrics::register(&mut registry);
        let backend = Arc::new(LocalBackend::open(dir, 1024).await.unwrap());
        (
            HealthState {
                registry: Arc::new(registry),
                backend,
            },
            metrics,
        )
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn metrics_expose_counters() {
        let dir = tempfile::tempdir().unwrap();
        let (state, metrics) = state(dir.path()).await;
        metrics.files_added.inc();
        metrics.record_sync(&SyncReport {
            transferred: 3,
            skipped: 0,
            failed: 1,
            first_error: None,
        });

        let (status, body) = get(router(state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("fbed_files_added_total 1"));
        assert!(body.contains("fbed_sync_transferred_total 3"));
        assert!(body.contains("fbed_sync_failed_total 1"));
    }

    #[tokio::test]
    async fn probes() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state(dir.path()).await;
        assert_eq!(get(router(state.clone()), "/healthz").await.0, StatusCode::OK);
        assert_eq!(get(router(state), "/readyz").await.0, StatusCode::OK);
    }
}
