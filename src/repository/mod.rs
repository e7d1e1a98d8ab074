// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Repository layer: durable CRUD over licenses, entitlements,
//! usage events and sync-status rows.
//!
//! Every repository here is backed by the same SQLite pool (via `sqlx`),
//! mirroring a single opaque relational store. Traits are
//! kept separate from the concrete adapter so call sites depend on
//! behaviour, not on SQLite specifically.

mod sqlite;

pub use sqlite::SqliteRepositories;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{CameraLicense, FeatureEntitlement, SyncStatus, UsageEvent};

/// One row of `edge_devices`.
#[derive(Debug, Clone)]
pub struct EdgeDevice {
    pub device_id: String,
    pub tenant_id: String,
    pub management_tier: String,
    pub last_heartbeat: DateTime<Utc>,
}

#[async_trait]
pub trait EdgeDeviceRepository: Send + Sync {
    async fn upsert(&self, device: &EdgeDevice) -> Result<()>;
    async fn find(&self, device_id: &str) -> Result<Option<EdgeDevice>>;
}

#[async_trait]
pub trait CameraLicenseRepository: Send + Sync {
    async fn upsert(&self, license: &CameraLicense) -> Result<()>;
    async fn find(&self, camera_id: &str) -> Result<Option<CameraLicense>>;
    async fn delete(&self, camera_id: &str) -> Result<()>;
    /// Licenses in `mode=trial` with `valid_until` in the future, for a tenant.
    async fn count_active_trials(&self, tenant_id: &str) -> Result<i64>;
    /// Licenses whose `valid_until` falls within the next `within_minutes`.
    async fn find_expiring_soon(&self, within_minutes: i64) -> Result<Vec<CameraLicense>>;
}

#[async_trait]
pub trait FeatureEntitlementRepository: Send + Sync {
    async fn upsert(&self, entitlement: &FeatureEntitlement) -> Result<()>;
    async fn find(
        &self,
        tenant_id: &str,
        category: &str,
        feature: &str,
    ) -> Result<Option<FeatureEntitlement>>;
    /// Atomic `quota_used += amount` guarded by the unique key; returns the
    /// row after increment, or `Ok(None)` if no such row exists yet.
    async fn increment_quota(
        &self,
        tenant_id: &str,
        category: &str,
        feature: &str,
        amount: i64,
    ) -> Result<Option<FeatureEntitlement>>;
    /// Rows not checked within `stale_minutes` are cleared entirely.
    /// Bounded to keep latency predictable.
    async fn clear_stale(&self, stale_minutes: i64, max_rows: i64) -> Result<u64>;
}

#[async_trait]
pub trait UsageEventRepository: Send + Sync {
    /// All-or-nothing within a single transaction.
    async fn save_batch(&self, events: &[UsageEvent]) -> Result<()>;
    /// At most `limit` rows in submission order (`event_time` ascending).
    async fn find_unsynced(&self, limit: i64) -> Result<Vec<UsageEvent>>;
    /// Idempotent: marking an already-synced id is a no-op.
    async fn mark_synced(&self, ids: &[String]) -> Result<()>;
    async fn sum_by_type(
        &self,
        tenant_id: &str,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<f64>;
    async fn delete_old(&self, older_than_days: i64, max_rows: i64) -> Result<u64>;
}

#[async_trait]
pub trait SyncStatusRepository: Send + Sync {
    async fn upsert(&self, status: &SyncStatus) -> Result<()>;
    async fn find(&self, device_id: &str) -> Result<Option<SyncStatus>>;
}
