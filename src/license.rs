// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! License & entitlement plane: validates camera licenses and
//! feature entitlements, caches results, and falls back to the cache (and
//! ultimately the repository) when remote billing is unreachable.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::billing::{BillingClient, EntitlementCheckRequest, LicenseValidateRequest};
use crate::cache::TieredCache;
use crate::config::BillingConfig;
use crate::error::{GatewayError, Result};
use crate::models::{CameraLicense, FeatureEntitlement, LicenseMode};
use crate::repository::{CameraLicenseRepository, FeatureEntitlementRepository};

/// Plain data describing the degraded-mode diagnostic surface.
#[derive(Debug, Clone, Copy)]
pub struct DegradedStatus {
    pub degraded: bool,
    pub last_sync: DateTime<Utc>,
}

struct DegradedState {
    degraded: bool,
    last_sync: DateTime<Utc>,
}

/// Growth-pack → feature mapping, loaded once at startup and treated as
/// immutable thereafter. Passed around by reference, never mutated after
/// construction.
#[derive(Debug, Clone, Default)]
pub struct GrowthPackCatalog {
    packs: HashMap<String, Vec<(String, String)>>,
}

impl GrowthPackCatalog {
    pub fn from_config(raw: &HashMap<String, Vec<crate::config::GrowthPackFeature>>) -> Self {
        let packs = raw
            .iter()
            .map(|(pack, features)| {
                (
                    pack.clone(),
                    features.iter().map(|f| (f.category.clone(), f.feature.clone())).collect(),
                )
            })
            .collect();
        GrowthPackCatalog { packs }
    }

    pub fn features_for(&self, pack: &str) -> &[(String, String)] {
        self.packs.get(pack).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// The license & entitlement plane. One instance per process, constructed
/// once at boot and passed by `Arc` into the camera registry, API surface
/// and maintenance sweeps. No process-global singleton.
pub struct LicensePlane {
    billing: Arc<dyn BillingClient>,
    cache: TieredCache,
    license_repo: Arc<dyn CameraLicenseRepository>,
    entitlement_repo: Arc<dyn FeatureEntitlementRepository>,
    config: BillingConfig,
    license_ttl_seconds: i64,
    entitlement_ttl_seconds: i64,
    growth_packs: GrowthPackCatalog,
    device_id: String,
    degraded: Mutex<DegradedState>,
}

impl LicensePlane {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        billing: Arc<dyn BillingClient>,
        cache: TieredCache,
        license_repo: Arc<dyn CameraLicenseRepository>,
        entitlement_repo: Arc<dyn FeatureEntitlementRepository>,
        config: BillingConfig,
        license_ttl_seconds: i64,
        entitlement_ttl_seconds: i64,
        growth_packs: GrowthPackCatalog,
        device_id: String,
    ) -> Self {
        LicensePlane {
            billing,
            cache,
            license_repo,
            entitlement_repo,
            config,
            license_ttl_seconds,
            entitlement_ttl_seconds,
            growth_packs,
            device_id,
            degraded: Mutex::new(DegradedState { degraded: false, last_sync: Utc::now() }),
        }
    }

    fn license_cache_key(camera_id: &str) -> String {
        format!("license:camera:{camera_id}")
    }

    fn entitlement_cache_key(tenant_id: &str, category: &str, feature: &str) -> String {
        format!("entitlement:{tenant_id}:{category}:{feature}")
    }

    fn growth_packs_cache_key(tenant_id: &str) -> String {
        format!("growth_packs:{tenant_id}")
    }

    /// Reads (degraded, time-since-last-sync) for diagnostics. Takes the
    /// lock exactly once per call.
    pub fn degraded_status(&self) -> DegradedStatus {
        let state = self.degraded.lock();
        DegradedStatus { degraded: state.degraded, last_sync: state.last_sync }
    }

    fn mark_success(&self) {
        let mut state = self.degraded.lock();
        state.degraded = false;
        state.last_sync = Utc::now();
    }

    fn mark_failure(&self) {
        self.degraded.lock().degraded = true;
    }

    /// `force_refresh` bypasses the cache and always calls the remote
    /// billing service.
    pub async fn validate_camera_license(
        &self,
        camera_id: &str,
        tenant_id: &str,
        force_refresh: bool,
    ) -> Result<CameraLicense> {
        let cache_key = Self::license_cache_key(camera_id);

        if !force_refresh {
            if let Some(cached) = crate::cache::get_json::<CameraLicense>(&self.cache, &cache_key).await {
                debug!(camera_id, "license cache hit");
                return Ok(cached);
            }
        }

        match self
            .billing
            .validate_license(LicenseValidateRequest {
                camera_id,
                tenant_id,
                device_id: &self.device_id,
            })
            .await
        {
            Ok(response) => {
                let now = Utc::now();
                let license = CameraLicense {
                    camera_id: camera_id.to_string(),
                    tenant_id: tenant_id.to_string(),
                    device_id: self.device_id.clone(),
                    mode: response.mode(),
                    is_valid: response.is_valid,
                    valid_until: response.valid_until,
                    enabled_growth_packs: response.enabled_growth_packs,
                    last_validated: now,
                    created_at: now,
                    updated_at: now,
                    error_message: None,
                };

                crate::cache::set_json(&self.cache, &cache_key, &license, self.license_ttl_seconds).await?;
                self.license_repo.upsert(&license).await?;
                self.mark_success();

                info!(camera_id, mode = license.mode.as_str(), valid = license.is_valid, "license validated");
                Ok(license)
            }
            Err(e) => {
                warn!(camera_id, error = %e, "billing validate-license failed, entering degraded mode");
                self.mark_failure();
                self.handle_offline_validation(camera_id, tenant_id, &cache_key).await
            }
        }
    }

    /// Called once the remote billing RPC has failed and we fall back to
    /// cached or stored state.
    async fn handle_offline_validation(
        &self,
        camera_id: &str,
        tenant_id: &str,
        cache_key: &str,
    ) -> Result<CameraLicense> {
        let now = Utc::now();

        if let Some(mut cached) = crate::cache::get_json::<CameraLicense>(&self.cache, cache_key).await {
            if cached.valid_until > now && !self.grace_period_expired() {
                cached.error_message = Some("Degraded: using cached license".to_string());
                return Ok(cached);
            }
        } else if let Ok(Some(mut stored)) = self.license_repo.find(camera_id).await {
            if stored.valid_until > now && !self.grace_period_expired() {
                stored.error_message = Some("Degraded: using cached license".to_string());
                return Ok(stored);
            }
        }

        // No usable cached/stored license, or it is expired, or the
        // offline grace period has elapsed.
        let mut fallback = CameraLicense::unlicensed(camera_id, tenant_id, &self.device_id);
        fallback.error_message = Some("Degraded: no valid cached license".to_string());
        Ok(fallback)
    }

    fn grace_period_expired(&self) -> bool {
        let state = self.degraded.lock();
        if !state.degraded {
            return false;
        }
        let grace = chrono::Duration::hours(self.config.offline_grace_period_hours);
        Utc::now() - state.last_sync > grace
    }

    /// -1 means unlimited for base tier, `TRIAL_CAMERA_LIMIT` for trial, 0
    /// for unlicensed. Defaults to the trial limit on failure.
    pub async fn camera_limit(&self, tenant_id: &str) -> i64 {
        match self
            .billing
            .validate_license(LicenseValidateRequest {
                camera_id: "__tenant_probe__",
                tenant_id,
                device_id: &self.device_id,
            })
            .await
        {
            Ok(response) => match response.mode() {
                LicenseMode::Base => -1,
                LicenseMode::Trial => response.cameras_allowed.unwrap_or(self.config.trial_camera_limit),
                LicenseMode::Unlicensed => 0,
            },
            Err(_) => self.config.trial_camera_limit,
        }
    }

    /// Whether another camera may be added under the given limit/count.
    pub fn can_add_camera(limit: i64, current_count: i64) -> bool {
        limit == -1 || current_count < limit
    }

    /// Same cache-then-remote-then-repository shape as license validation.
    pub async fn check_entitlement(
        &self,
        tenant_id: &str,
        category: &str,
        feature: &str,
    ) -> Result<FeatureEntitlement> {
        let cache_key = Self::entitlement_cache_key(tenant_id, category, feature);

        if let Some(cached) = crate::cache::get_json::<FeatureEntitlement>(&self.cache, &cache_key).await {
            return Ok(cached);
        }

        match self
            .billing
            .check_entitlement(EntitlementCheckRequest {
                tenant_id,
                feature_category: category,
                feature_name: feature,
            })
            .await
        {
            Ok(response) => {
                let now = Utc::now();
                let entitlement = FeatureEntitlement {
                    tenant_id: tenant_id.to_string(),
                    category: category.to_string(),
                    feature: feature.to_string(),
                    enabled: response.is_enabled,
                    quota_limit: response.quota_limit,
                    quota_used: response.quota_used,
                    valid_until: response.valid_until,
                    last_checked: now,
                };
                crate::cache::set_json(&self.cache, &cache_key, &entitlement, self.entitlement_ttl_seconds).await?;
                self.entitlement_repo.upsert(&entitlement).await?;
                self.mark_success();
                Ok(entitlement)
            }
            Err(e) => {
                warn!(tenant_id, category, feature, error = %e, "entitlement check failed, falling back to repository");
                self.mark_failure();
                match self.entitlement_repo.find(tenant_id, category, feature).await? {
                    Some(row) => Ok(row),
                    None => Ok(FeatureEntitlement::disabled(tenant_id, category, feature)),
                }
            }
        }
    }

    /// A single usage event must never be double-counted: callers pass
    /// `amount` once, and a repository write failure is treated as
    /// not-applied (safe to retry).
    pub async fn increment_quota_usage(
        &self,
        tenant_id: &str,
        category: &str,
        feature: &str,
        amount: i64,
    ) -> Result<Option<FeatureEntitlement>> {
        self.entitlement_repo.increment_quota(tenant_id, category, feature, amount).await
    }

    /// Cached under `growth_packs:<tenant>`.
    pub async fn enabled_growth_packs(&self, tenant_id: &str, camera_id: &str) -> Result<Vec<String>> {
        let cache_key = Self::growth_packs_cache_key(tenant_id);
        if let Some(cached) = crate::cache::get_json::<Vec<String>>(&self.cache, &cache_key).await {
            return Ok(cached);
        }
        let license = self.validate_camera_license(camera_id, tenant_id, false).await?;
        crate::cache::set_json(&self.cache, &cache_key, &license.enabled_growth_packs, self.license_ttl_seconds).await?;
        Ok(license.enabled_growth_packs)
    }

    pub async fn has_growth_pack(&self, tenant_id: &str, camera_id: &str, pack: &str) -> Result<bool> {
        let packs = self.enabled_growth_packs(tenant_id, camera_id).await?;
        Ok(packs.iter().any(|p| p == pack))
    }

    pub fn growth_pack_catalog(&self) -> &GrowthPackCatalog {
        &self.growth_packs
    }

    /// Clears entitlement rows not checked within `stale_minutes`, bounded
    /// to `max_rows` per call. Run periodically by the maintenance sweep,
    /// never from the per-request path.
    pub async fn clear_stale_entitlements(&self, stale_minutes: i64, max_rows: i64) -> Result<u64> {
        self.entitlement_repo.clear_stale(stale_minutes, max_rows).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::MockBillingClient;
    use crate::repository::SqliteRepositories;

    async fn test_plane() -> (LicensePlane, Arc<MockBillingClient>) {
        let repo = SqliteRepositories::connect("sqlite::memory:").await.unwrap();
        let repo: Arc<SqliteRepositories> = Arc::new(repo);
        let mock = Arc::new(MockBillingClient::default());
        let plane = LicensePlane::new(
            mock.clone(),
            TieredCache::tier1_only(),
            repo.clone(),
            repo,
            BillingConfig::default(),
            3600,
            300,
            GrowthPackCatalog::default(),
            "device-1".to_string(),
        );
        (plane, mock)
    }

    #[tokio::test]
    async fn trial_issuance_caches_and_persists() {
        let (plane, _mock) = test_plane().await;
        let license = plane.validate_camera_license("C1", "T1", false).await.unwrap();
        assert_eq!(license.mode, LicenseMode::Trial);
        assert!(license.is_valid);
        assert!(license.enabled_growth_packs.is_empty());

        // Second call should hit the tier-1 cache, not re-touch the mock.
        let cached = plane.validate_camera_license("C1", "T1", false).await.unwrap();
        assert_eq!(cached.mode, LicenseMode::Trial);
    }

    #[tokio::test]
    async fn degraded_mode_uses_cache_then_rejects_after_grace_period() {
        let (plane, mock) = test_plane().await;
        let first = plane.validate_camera_license("C1", "T1", false).await.unwrap();
        assert!(first.is_valid);

        // Simulate remote outage; cached entry with far-future valid_until
        // should keep returning valid=true with the degraded annotation.
        mock.set_failing(true);
        let degraded = plane.validate_camera_license("C1", "T1", true).await.unwrap();
        assert!(degraded.is_valid);
        assert!(degraded.error_message.as_deref().unwrap_or("").contains("Degraded") ||
            degraded.error_message.as_deref().unwrap_or("").to_lowercase().contains("degraded"));
    }

    #[test]
    fn can_add_camera_unlimited() {
        assert!(LicensePlane::can_add_camera(-1, 9999));
    }

    #[test]
    fn can_add_camera_at_limit() {
        assert!(!LicensePlane::can_add_camera(2, 2));
        assert!(LicensePlane::can_add_camera(2, 1));
    }
}
