// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Wires together the gateway's services from a loaded [`Config`]. One
//! `GatewayApp` is built at process start and handed by `Arc` to the CLI,
//! the status surface, and the maintenance sweeps — there is no
//! process-global singleton.

use std::sync::Arc;

use tracing::info;

use crate::billing::{BillingClient, HttpBillingClient, MockBillingClient};
use crate::cache::TieredCache;
use crate::config::Config;
use crate::error::Result;
use crate::license::{GrowthPackCatalog, LicensePlane};
use crate::registry::CameraRegistry;
use crate::repository::SqliteRepositories;
use crate::tasks::TaskExecutor;
use crate::usage::UsageTracker;
use crate::zones::manager::ZoneManager;

pub struct GatewayApp {
    pub config: Config,
    pub license_plane: Arc<LicensePlane>,
    pub registry: Arc<CameraRegistry>,
    pub usage_tracker: Arc<UsageTracker>,
    pub task_executor: Arc<TaskExecutor>,
    pub zones: Arc<ZoneManager>,
    pub billing: Arc<dyn BillingClient>,
}

impl GatewayApp {
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let repos = Arc::new(SqliteRepositories::connect(&config.storage.database_url).await?);

        let cache = if config.features.enable_offline_mode {
            TieredCache::connect(&config.cache.redis_url, 3).await
        } else {
            TieredCache::tier1_only()
        };

        let billing: Arc<dyn BillingClient> = if config.billing.mock {
            Arc::new(MockBillingClient { trial_cameras_allowed: config.billing.trial_camera_limit, fail: Default::default() })
        } else {
            Arc::new(HttpBillingClient::new(&config.billing)?)
        };

        let growth_packs = GrowthPackCatalog::from_config(&config.growth_packs);

        let license_plane = Arc::new(LicensePlane::new(
            billing.clone(),
            cache,
            repos.clone(),
            repos.clone(),
            config.billing.clone(),
            config.cache.license_ttl_seconds,
            config.cache.entitlement_ttl_seconds,
            growth_packs,
            config.device.device_id.clone(),
        ));

        let registry = Arc::new(CameraRegistry::new(
            license_plane.clone(),
            repos.clone(),
            billing.clone(),
            config.device.device_id.clone(),
            config.device.tenant_id.clone(),
            config.device.management_tier.clone(),
        ));

        let usage_tracker = UsageTracker::new(repos.clone(), billing.clone(), config.usage.clone());
        usage_tracker.reload_unsynced().await?;

        let task_executor = TaskExecutor::new();
        let zones = Arc::new(ZoneManager::new());

        for camera in &config.cameras {
            registry.create_camera(Some(camera.id.clone()), Some(camera.name.clone()), &camera.tenant_id).await.ok();
        }

        info!(cameras = config.cameras.len(), device_id = %config.device.device_id, "gateway bootstrapped");

        Ok(GatewayApp { config, license_plane, registry, usage_tracker, task_executor, zones, billing })
    }

    pub fn degraded_status(&self) -> crate::license::DegradedStatus {
        self.license_plane.degraded_status()
    }
}
