// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Periodic maintenance sweeps: device heartbeat and stale-entitlement
//! cleanup. Neither is on the request-serving or per-frame hot path; both
//! run on their own interval, sharing the gateway's cooperative shutdown
//! signal the same way the usage tracker's sync loop does.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MaintenanceConfig;
use crate::license::LicensePlane;
use crate::registry::CameraRegistry;
use crate::tasks::TaskExecutor;

/// Spawns one background task that interleaves the heartbeat sweep, the
/// stale-entitlement sweep and terminal-task garbage collection on their
/// own configured intervals. Exits once `shutdown` fires.
pub fn spawn(
    config: MaintenanceConfig,
    license_plane: Arc<LicensePlane>,
    registry: Arc<CameraRegistry>,
    task_executor: Arc<TaskExecutor>,
    enable_heartbeat: bool,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut heartbeat_tick = tokio::time::interval(Duration::from_secs(config.heartbeat_interval_seconds.max(1)));
        let mut entitlement_tick =
            tokio::time::interval(Duration::from_secs(config.entitlement_sweep_interval_seconds.max(1)));
        // First tick fires immediately; the service should not wait a
        // full interval before its first heartbeat/sweep after boot.
        heartbeat_tick.tick().await;
        entitlement_tick.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat_tick.tick() => {
                    if enable_heartbeat {
                        run_heartbeat(&registry).await;
                    }
                    task_executor.cleanup_old_tasks(Some(config.task_cleanup_max_age_seconds));
                }
                _ = entitlement_tick.tick() => {
                    run_entitlement_sweep(&license_plane, config.entitlement_stale_minutes).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("maintenance sweeps shutting down");
    })
}

async fn run_heartbeat(registry: &CameraRegistry) {
    match registry.heartbeat().await {
        Ok(response) => debug!(status = %response.status, "heartbeat sent"),
        Err(e) => warn!(error = %e, "heartbeat failed, will retry on next interval"),
    }
}

async fn run_entitlement_sweep(license_plane: &LicensePlane, stale_minutes: i64) {
    const MAX_ROWS_PER_SWEEP: i64 = 500;
    match license_plane.clear_stale_entitlements(stale_minutes, MAX_ROWS_PER_SWEEP).await {
        Ok(cleared) if cleared > 0 => info!(cleared, "cleared stale feature entitlements"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "stale-entitlement sweep failed"),
    }
}
