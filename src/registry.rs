// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Camera registry: license-gated camera lifecycle. `create_camera` and
//! `delete_camera` are serialized against each other through an async
//! creation lock held across every await in the operation (license-limit
//! check, validation, RPC) — not just the in-memory map — so concurrent
//! same-tenant creates cannot both observe the trial-camera count as
//! under the limit and both succeed. A camera never exists in the
//! registry without a license row backing it, and deleting a camera
//! always revokes its license first.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::billing::{BillingClient, HeartbeatRequest};
use crate::error::{GatewayError, Result};
use crate::license::LicensePlane;
use crate::repository::CameraLicenseRepository;

#[derive(Debug, Clone)]
pub struct Camera {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
}

/// Owns the set of known cameras and gates every create/delete through the
/// license plane. `creation_lock` is an async mutex held for the *entire*
/// `create_camera`/`delete_camera` operation, including the
/// license-plane and billing awaits — not just the in-memory map — so
/// `createCamera`/`deleteCamera` run as one real critical section and a
/// concurrent caller never observes a camera with no backing license, a
/// license with no backing camera, or a tenant's trial-camera count
/// racing past its limit.
pub struct CameraRegistry {
    cameras: Mutex<HashMap<String, Camera>>,
    creation_lock: tokio::sync::Mutex<()>,
    license_plane: Arc<LicensePlane>,
    license_repo: Arc<dyn CameraLicenseRepository>,
    billing: Arc<dyn BillingClient>,
    device_id: String,
    device_tenant_id: String,
    management_tier: String,
}

impl CameraRegistry {
    pub fn new(
        license_plane: Arc<LicensePlane>,
        license_repo: Arc<dyn CameraLicenseRepository>,
        billing: Arc<dyn BillingClient>,
        device_id: String,
        device_tenant_id: String,
        management_tier: String,
    ) -> Self {
        CameraRegistry {
            cameras: Mutex::new(HashMap::new()),
            creation_lock: tokio::sync::Mutex::new(()),
            license_plane,
            license_repo,
            billing,
            device_id,
            device_tenant_id,
            management_tier,
        }
    }

    /// Creates a camera, gated by the license plane. `id` defaults to a
    /// generated uuid; `name` defaults to the id.
    pub async fn create_camera(
        &self,
        id: Option<String>,
        name: Option<String>,
        tenant_id: &str,
    ) -> Result<Camera> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let name = name.unwrap_or_else(|| id.clone());

        // Held across every await below: the license-limit check,
        // validation and billing RPC all happen inside this one critical
        // section, so two concurrent creates for the same tenant cannot
        // both read the trial count as under the limit and both succeed.
        let _guard = self.creation_lock.lock().await;

        {
            let cameras = self.cameras.lock();
            if cameras.contains_key(&id) {
                return Err(GatewayError::CameraAlreadyExists { id });
            }
        }

        // Enforce the tenant's camera limit before the license plane
        // persists a license row for this camera: `count_active_trials`
        // reflects only cameras that already exist, so checking first
        // (rather than after validation upserts this camera's own row)
        // avoids counting the camera being created against its own limit.
        let limit = self.license_plane.camera_limit(tenant_id).await;
        let active_trials = self.license_repo.count_active_trials(tenant_id).await?;
        if !LicensePlane::can_add_camera(limit, active_trials) {
            return Err(GatewayError::LicenseLimitExceeded { tenant_id: tenant_id.to_string(), limit });
        }

        let mut license = self.license_plane.validate_camera_license(&id, tenant_id, true).await?;

        if !license.is_valid {
            // Re-validating with a fresh camera id causes the billing
            // service to provision a new trial license, per the same
            // remote contract used for first-time validation.
            license = self.license_plane.validate_camera_license(&id, tenant_id, true).await?;
            if !license.is_valid {
                return Err(GatewayError::LicenseIssueFailed {
                    camera_id: id.clone(),
                    reason: license.error_message.unwrap_or_else(|| "license remained invalid after reissue".to_string()),
                });
            }
        }

        let camera = Camera { id: id.clone(), name, tenant_id: tenant_id.to_string(), created_at: Utc::now() };
        self.cameras.lock().insert(id.clone(), camera.clone());

        if let Err(e) = self
            .billing
            .heartbeat(HeartbeatRequest {
                device_id: &self.device_id,
                tenant_id,
                active_camera_ids: &[id.clone()],
                management_tier: &self.management_tier,
            })
            .await
        {
            warn!(camera_id = %id, error = %e, "initial heartbeat failed after camera creation");
        }

        info!(camera_id = %id, tenant_id, "camera created");
        Ok(camera)
    }

    /// Removes a camera and revokes its license. Missing cameras are
    /// treated as already deleted (idempotent).
    pub async fn delete_camera(&self, id: &str) -> Result<()> {
        // Same lock as `create_camera`, held across the license-repo await:
        // a delete can't interleave with a concurrent create/delete and
        // leave the camera map and the license table disagreeing.
        let _guard = self.creation_lock.lock().await;

        let removed = self.cameras.lock().remove(id);
        if removed.is_none() {
            return Err(GatewayError::CameraNotFound { id: id.to_string() });
        }
        if let Err(e) = self.license_repo.delete(id).await {
            // License revoke failed: put the camera back so the registry
            // doesn't claim the camera is gone while its license survives.
            self.cameras.lock().insert(id.to_string(), removed.unwrap());
            return Err(e);
        }
        info!(camera_id = id, "camera deleted, license revoked");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Camera> {
        self.cameras.lock().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Camera> {
        self.cameras.lock().values().cloned().collect()
    }

    /// Sends one heartbeat covering every currently-registered camera.
    /// Sending the same set of active camera ids twice in a row has no
    /// side effect beyond refreshing `last_heartbeat` on the remote side.
    pub async fn heartbeat(&self) -> Result<crate::billing::HeartbeatResponse> {
        let active_camera_ids: Vec<String> = self.cameras.lock().keys().cloned().collect();
        self.billing
            .heartbeat(HeartbeatRequest {
                device_id: &self.device_id,
                tenant_id: &self.device_tenant_id,
                active_camera_ids: &active_camera_ids,
                management_tier: &self.management_tier,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::MockBillingClient;
    use crate::cache::TieredCache;
    use crate::config::BillingConfig;
    use crate::license::GrowthPackCatalog;
    use crate::repository::SqliteRepositories;

    async fn test_registry(trial_limit: i64) -> (CameraRegistry, Arc<MockBillingClient>) {
        let repos = SqliteRepositories::connect("sqlite::memory:").await.unwrap();
        let repos = Arc::new(repos);
        let billing = Arc::new(MockBillingClient { trial_cameras_allowed: trial_limit, fail: Default::default() });
        let cache = TieredCache::tier1_only();

        let mut config = BillingConfig::default();
        config.trial_camera_limit = trial_limit;

        let plane = Arc::new(LicensePlane::new(
            billing.clone(),
            cache,
            repos.clone(),
            repos.clone(),
            config,
            3600,
            300,
            GrowthPackCatalog::default(),
            "device-1".to_string(),
        ));

        let registry = CameraRegistry::new(
            plane,
            repos.clone(),
            billing.clone(),
            "device-1".to_string(),
            "T1".to_string(),
            "base".to_string(),
        );
        (registry, billing)
    }

    #[tokio::test]
    async fn trial_issuance_then_limit_exceeded() {
        let (registry, _billing) = test_registry(2).await;

        let c1 = registry.create_camera(Some("C1".to_string()), None, "T1").await.unwrap();
        assert_eq!(c1.id, "C1");
        let c2 = registry.create_camera(Some("C2".to_string()), None, "T1").await.unwrap();
        assert_eq!(c2.id, "C2");

        let err = registry.create_camera(Some("C3".to_string()), None, "T1").await.unwrap_err();
        assert!(matches!(err, GatewayError::LicenseLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn duplicate_camera_id_rejected() {
        let (registry, _billing) = test_registry(5).await;
        registry.create_camera(Some("C1".to_string()), None, "T1").await.unwrap();
        let err = registry.create_camera(Some("C1".to_string()), None, "T1").await.unwrap_err();
        assert!(matches!(err, GatewayError::CameraAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn delete_missing_camera_is_not_found() {
        let (registry, _billing) = test_registry(5).await;
        let err = registry.delete_camera("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::CameraNotFound { .. }));
    }

    #[tokio::test]
    async fn delete_removes_camera_and_license() {
        let (registry, _billing) = test_registry(5).await;
        registry.create_camera(Some("C1".to_string()), None, "T1").await.unwrap();
        registry.delete_camera("C1").await.unwrap();
        assert!(registry.get("C1").is_none());
    }
}
