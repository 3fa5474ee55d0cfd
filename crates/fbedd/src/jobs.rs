//! Scheduled jobs: trash sweep and periodic pull/push against configured peers

use fbed_core::config::{FbedConfig, PeerJobConfig, TransportConfig};
use fbed_store::FileService;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::api::{run_sync, Direction};
use crate::metrics::Metrics;

/// Spawn every enabled job; the first run of each happens one interval in.
pub fn spawn_all(
    service: Arc<FileService>,
    config: &FbedConfig,
    metrics: Metrics,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    if config.trash.enabled && config.trash.sweep_interval_secs > 0 {
        let period = Duration::from_secs(config.trash.sweep_interval_secs);
        handles.push(tokio::spawn(sweep_loop(
            service.clone(),
            period,
            metrics.clone(),
        )));
        info!(every = ?period, "trash sweep scheduled");
    }

    for (job, direction) in [
        (&config.sync.pull, Direction::Pull),
        (&config.sync.push, Direction::Push),
    ] {
        if job.is_enabled() {
            info!(peer = %job.host, every_secs = job.interval_secs, direction = ?direction, "sync scheduled");
            handles.push(tokio::spawn(sync_loop(
                service.clone(),
                job.clone(),
                config.transport.clone(),
                direction,
                metrics.clone(),
            )));
        }
    }

    handles
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn sweep_loop(service: Arc<FileService>, period: Duration, metrics: Metrics) {
    let mut ticker = ticker(period);
    loop {
        ticker.tick().await;
        info!("trash sweep: starting");
        match service.sweep_trash().await {
            Ok(report) => {
                metrics.trash_purged.inc_by(report.purged as u64);
                info!(purged = report.purged, retained = report.retained, "trash sweep: done");
            }
            Err(e) => error!(error = %e, "trash sweep failed"),
        }
    }
}

async fn sync_loop(
    service: Arc<FileService>,
    job: PeerJobConfig,
    transport: TransportConfig,
    direction: Direction,
    metrics: Metrics,
) {
    let mut ticker = ticker(Duration::from_secs(job.interval_secs));
    loop {
        ticker.tick().await;
        info!(peer = %job.host, direction = ?direction, "scheduled sync: starting");
        let result = run_sync(
            service.clone(),
            &transport,
            &job.host,
            SecretString::from(job.secret.clone()),
            &job.path,
            direction,
        )
        .await;
        match result {
            Ok(report) => {
                metrics.record_sync(&report);
                info!(
                    peer = %job.host,
                    direction = ?direction,
                    transferred = report.transferred,
                    skipped = report.skipped,
                    failed = report.failed,
                    "scheduled sync: done"
                );
            }
            Err(e) => error!(peer = %job.host, direction = ?direction, error = %e, "scheduled sync failed"),
        }
    }
}
