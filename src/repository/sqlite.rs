// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! SQLite-backed concrete adapter for every repository trait in this
//! module. One pool, five tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use super::{
    CameraLicenseRepository, EdgeDevice, EdgeDeviceRepository, FeatureEntitlementRepository,
    SyncStatusRepository, UsageEventRepository,
};
use crate::error::{GatewayError, Result};
use crate::models::{CameraLicense, FeatureEntitlement, LicenseMode, SyncStatus, UsageEvent, UsageEventType};

/// Owns the pool and implements every repository trait. Cloning is cheap:
/// `SqlitePool` is itself a handle over a connection pool.
#[derive(Clone)]
pub struct SqliteRepositories {
    pool: SqlitePool,
}

impl SqliteRepositories {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(GatewayError::Database)?;
        let repo = SqliteRepositories { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS edge_devices (
                device_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                management_tier TEXT NOT NULL,
                last_heartbeat TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS camera_licenses (
                camera_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                mode TEXT NOT NULL,
                is_valid INTEGER NOT NULL,
                valid_until TEXT NOT NULL,
                enabled_growth_packs TEXT NOT NULL,
                last_validated TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_camera_licenses_tenant ON camera_licenses(tenant_id);

            CREATE TABLE IF NOT EXISTS feature_entitlements (
                tenant_id TEXT NOT NULL,
                category TEXT NOT NULL,
                feature TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                quota_limit INTEGER NOT NULL,
                quota_used INTEGER NOT NULL,
                valid_until TEXT NOT NULL,
                last_checked TEXT NOT NULL,
                PRIMARY KEY (tenant_id, category, feature)
            );

            CREATE TABLE IF NOT EXISTS usage_events (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                camera_id TEXT,
                event_type TEXT NOT NULL,
                quantity REAL NOT NULL,
                unit TEXT NOT NULL,
                metadata TEXT NOT NULL,
                event_time TEXT NOT NULL,
                synced INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_usage_events_synced ON usage_events(synced, event_time);

            CREATE TABLE IF NOT EXISTS billing_sync_status (
                device_id TEXT PRIMARY KEY,
                degraded INTEGER NOT NULL,
                last_sync TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(GatewayError::Database)?;
        Ok(())
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GatewayError::Database(sqlx::Error::Decode(Box::new(e))))
}

#[async_trait]
impl EdgeDeviceRepository for SqliteRepositories {
    async fn upsert(&self, device: &EdgeDevice) -> Result<()> {
        sqlx::query(
            "INSERT INTO edge_devices (device_id, tenant_id, management_tier, last_heartbeat)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(device_id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                management_tier = excluded.management_tier,
                last_heartbeat = excluded.last_heartbeat",
        )
        .bind(&device.device_id)
        .bind(&device.tenant_id)
        .bind(&device.management_tier)
        .bind(device.last_heartbeat.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(GatewayError::Database)?;
        Ok(())
    }

    async fn find(&self, device_id: &str) -> Result<Option<EdgeDevice>> {
        let row = sqlx::query(
            "SELECT device_id, tenant_id, management_tier, last_heartbeat FROM edge_devices WHERE device_id = ?1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(EdgeDevice {
                device_id: row.try_get("device_id").map_err(GatewayError::Database)?,
                tenant_id: row.try_get("tenant_id").map_err(GatewayError::Database)?,
                management_tier: row.try_get("management_tier").map_err(GatewayError::Database)?,
                last_heartbeat: parse_rfc3339(&row.try_get::<String, _>("last_heartbeat").map_err(GatewayError::Database)?)?,
            })),
        }
    }
}

fn license_from_row(row: sqlx::sqlite::SqliteRow) -> Result<CameraLicense> {
    let packs_json: String = row.try_get("enabled_growth_packs").map_err(GatewayError::Database)?;
    let mode_str: String = row.try_get("mode").map_err(GatewayError::Database)?;
    Ok(CameraLicense {
        camera_id: row.try_get("camera_id").map_err(GatewayError::Database)?,
        tenant_id: row.try_get("tenant_id").map_err(GatewayError::Database)?,
        device_id: row.try_get("device_id").map_err(GatewayError::Database)?,
        mode: LicenseMode::from_str(&mode_str).unwrap_or(LicenseMode::Unlicensed),
        is_valid: row.try_get::<i64, _>("is_valid").map_err(GatewayError::Database)? != 0,
        valid_until: parse_rfc3339(&row.try_get::<String, _>("valid_until").map_err(GatewayError::Database)?)?,
        enabled_growth_packs: serde_json::from_str(&packs_json).unwrap_or_default(),
        last_validated: parse_rfc3339(&row.try_get::<String, _>("last_validated").map_err(GatewayError::Database)?)?,
        created_at: parse_rfc3339(&row.try_get::<String, _>("created_at").map_err(GatewayError::Database)?)?,
        updated_at: parse_rfc3339(&row.try_get::<String, _>("updated_at").map_err(GatewayError::Database)?)?,
        error_message: None,
    })
}

#[async_trait]
impl CameraLicenseRepository for SqliteRepositories {
    async fn upsert(&self, license: &CameraLicense) -> Result<()> {
        let packs_json = serde_json::to_string(&license.enabled_growth_packs)
            .map_err(|e| GatewayError::ConstraintViolation(e.to_string()))?;
        sqlx::query(
            "INSERT INTO camera_licenses
                (camera_id, tenant_id, device_id, mode, is_valid, valid_until,
                 enabled_growth_packs, last_validated, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(camera_id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                device_id = excluded.device_id,
                mode = excluded.mode,
                is_valid = excluded.is_valid,
                valid_until = excluded.valid_until,
                enabled_growth_packs = excluded.enabled_growth_packs,
                last_validated = excluded.last_validated,
                updated_at = excluded.updated_at",
        )
        .bind(&license.camera_id)
        .bind(&license.tenant_id)
        .bind(&license.device_id)
        .bind(license.mode.as_str())
        .bind(license.is_valid as i64)
        .bind(license.valid_until.to_rfc3339())
        .bind(packs_json)
        .bind(license.last_validated.to_rfc3339())
        .bind(license.created_at.to_rfc3339())
        .bind(license.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(GatewayError::Database)?;
        Ok(())
    }

    async fn find(&self, camera_id: &str) -> Result<Option<CameraLicense>> {
        let row = sqlx::query("SELECT * FROM camera_licenses WHERE camera_id = ?1")
            .bind(camera_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(GatewayError::Database)?;
        row.map(license_from_row).transpose()
    }

    async fn delete(&self, camera_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM camera_licenses WHERE camera_id = ?1")
            .bind(camera_id)
            .execute(&self.pool)
            .await
            .map_err(GatewayError::Database)?;
        Ok(())
    }

    async fn count_active_trials(&self, tenant_id: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM camera_licenses
             WHERE tenant_id = ?1 AND mode = 'trial' AND valid_until > ?2",
        )
        .bind(tenant_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(GatewayError::Database)?;
        row.try_get::<i64, _>("n").map_err(GatewayError::Database)
    }

    async fn find_expiring_soon(&self, within_minutes: i64) -> Result<Vec<CameraLicense>> {
        let now = Utc::now();
        let horizon = now + chrono::Duration::minutes(within_minutes);
        let rows = sqlx::query(
            "SELECT * FROM camera_licenses WHERE valid_until BETWEEN ?1 AND ?2",
        )
        .bind(now.to_rfc3339())
        .bind(horizon.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(GatewayError::Database)?;
        rows.into_iter().map(license_from_row).collect()
    }
}

fn entitlement_from_row(row: sqlx::sqlite::SqliteRow) -> Result<FeatureEntitlement> {
    Ok(FeatureEntitlement {
        tenant_id: row.try_get("tenant_id").map_err(GatewayError::Database)?,
        category: row.try_get("category").map_err(GatewayError::Database)?,
        feature: row.try_get("feature").map_err(GatewayError::Database)?,
        enabled: row.try_get::<i64, _>("enabled").map_err(GatewayError::Database)? != 0,
        quota_limit: row.try_get("quota_limit").map_err(GatewayError::Database)?,
        quota_used: row.try_get("quota_used").map_err(GatewayError::Database)?,
        valid_until: parse_rfc3339(&row.try_get::<String, _>("valid_until").map_err(GatewayError::Database)?)?,
        last_checked: parse_rfc3339(&row.try_get::<String, _>("last_checked").map_err(GatewayError::Database)?)?,
    })
}

#[async_trait]
impl FeatureEntitlementRepository for SqliteRepositories {
    async fn upsert(&self, entitlement: &FeatureEntitlement) -> Result<()> {
        sqlx::query(
            "INSERT INTO feature_entitlements
                (tenant_id, category, feature, enabled, quota_limit, quota_used, valid_until, last_checked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(tenant_id, category, feature) DO UPDATE SET
                enabled = excluded.enabled,
                quota_limit = excluded.quota_limit,
                valid_until = excluded.valid_until,
                last_checked = excluded.last_checked",
        )
        .bind(&entitlement.tenant_id)
        .bind(&entitlement.category)
        .bind(&entitlement.feature)
        .bind(entitlement.enabled as i64)
        .bind(entitlement.quota_limit)
        .bind(entitlement.quota_used)
        .bind(entitlement.valid_until.to_rfc3339())
        .bind(entitlement.last_checked.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(GatewayError::Database)?;
        Ok(())
    }

    async fn find(
        &self,
        tenant_id: &str,
        category: &str,
        feature: &str,
    ) -> Result<Option<FeatureEntitlement>> {
        let row = sqlx::query(
            "SELECT * FROM feature_entitlements WHERE tenant_id = ?1 AND category = ?2 AND feature = ?3",
        )
        .bind(tenant_id)
        .bind(category)
        .bind(feature)
        .fetch_optional(&self.pool)
        .await
        .map_err(GatewayError::Database)?;
        row.map(entitlement_from_row).transpose()
    }

    async fn increment_quota(
        &self,
        tenant_id: &str,
        category: &str,
        feature: &str,
        amount: i64,
    ) -> Result<Option<FeatureEntitlement>> {
        // A single UPDATE whose WHERE clause matches the unique key: SQLite
        // serialises writers, so this is atomic without an explicit lock
        // atomic quota accounting.
        let result = sqlx::query(
            "UPDATE feature_entitlements SET quota_used = quota_used + ?1, last_checked = ?2
             WHERE tenant_id = ?3 AND category = ?4 AND feature = ?5",
        )
        .bind(amount)
        .bind(Utc::now().to_rfc3339())
        .bind(tenant_id)
        .bind(category)
        .bind(feature)
        .execute(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find(tenant_id, category, feature).await
    }

    async fn clear_stale(&self, stale_minutes: i64, max_rows: i64) -> Result<u64> {
        let threshold = Utc::now() - chrono::Duration::minutes(stale_minutes);
        let result = sqlx::query(
            "DELETE FROM feature_entitlements WHERE rowid IN (
                SELECT rowid FROM feature_entitlements WHERE last_checked < ?1 LIMIT ?2
             )",
        )
        .bind(threshold.to_rfc3339())
        .bind(max_rows)
        .execute(&self.pool)
        .await
        .map_err(GatewayError::Database)?;
        Ok(result.rows_affected())
    }
}

fn usage_event_from_row(row: sqlx::sqlite::SqliteRow) -> Result<UsageEvent> {
    let event_type_str: String = row.try_get("event_type").map_err(GatewayError::Database)?;
    let event_type = match event_type_str.as_str() {
        "api_call" => UsageEventType::ApiCall,
        "llm_tokens" => UsageEventType::LlmTokens,
        "storage_gb_days" => UsageEventType::StorageGbDays,
        "sms_sent" => UsageEventType::SmsSent,
        "agent_execution" => UsageEventType::AgentExecution,
        "cloud_export_gb" => UsageEventType::CloudExportGb,
        "webhook_call" => UsageEventType::WebhookCall,
        "email_sent" => UsageEventType::EmailSent,
        other => {
            return Err(GatewayError::ConstraintViolation(format!(
                "unknown usage event type '{other}'"
            )))
        }
    };
    let metadata_str: String = row.try_get("metadata").map_err(GatewayError::Database)?;
    Ok(UsageEvent {
        id: row.try_get("id").map_err(GatewayError::Database)?,
        tenant_id: row.try_get("tenant_id").map_err(GatewayError::Database)?,
        device_id: row.try_get("device_id").map_err(GatewayError::Database)?,
        camera_id: row.try_get("camera_id").map_err(GatewayError::Database)?,
        event_type,
        quantity: row.try_get("quantity").map_err(GatewayError::Database)?,
        unit: row.try_get("unit").map_err(GatewayError::Database)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
        event_time: parse_rfc3339(&row.try_get::<String, _>("event_time").map_err(GatewayError::Database)?)?,
        synced: row.try_get::<i64, _>("synced").map_err(GatewayError::Database)? != 0,
    })
}

#[async_trait]
impl UsageEventRepository for SqliteRepositories {
    async fn save_batch(&self, events: &[UsageEvent]) -> Result<()> {
        // Reserve a single transaction, all-or-nothing.
        let mut tx = self.pool.begin().await.map_err(GatewayError::Database)?;
        for event in events {
            let metadata_str = serde_json::to_string(&event.metadata)
                .map_err(|e| GatewayError::ConstraintViolation(e.to_string()))?;
            sqlx::query(
                "INSERT INTO usage_events
                    (id, tenant_id, device_id, camera_id, event_type, quantity, unit, metadata, event_time, synced)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET synced = excluded.synced",
            )
            .bind(&event.id)
            .bind(&event.tenant_id)
            .bind(&event.device_id)
            .bind(&event.camera_id)
            .bind(event.event_type.as_str())
            .bind(event.quantity)
            .bind(&event.unit)
            .bind(metadata_str)
            .bind(event.event_time.to_rfc3339())
            .bind(event.synced as i64)
            .execute(&mut *tx)
            .await
            .map_err(GatewayError::Database)?;
        }
        tx.commit().await.map_err(GatewayError::Database)?;
        Ok(())
    }

    async fn find_unsynced(&self, limit: i64) -> Result<Vec<UsageEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM usage_events WHERE synced = 0 ORDER BY event_time ASC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(GatewayError::Database)?;
        rows.into_iter().map(usage_event_from_row).collect()
    }

    async fn mark_synced(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(GatewayError::Database)?;
        for id in ids {
            // Idempotent: re-marking an already-synced row is a no-op update.
            sqlx::query("UPDATE usage_events SET synced = 1 WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(GatewayError::Database)?;
        }
        tx.commit().await.map_err(GatewayError::Database)?;
        Ok(())
    }

    async fn sum_by_type(
        &self,
        tenant_id: &str,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(quantity), 0.0) as total FROM usage_events
             WHERE tenant_id = ?1 AND event_type = ?2 AND event_time >= ?3",
        )
        .bind(tenant_id)
        .bind(event_type)
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(GatewayError::Database)?;
        row.try_get("total").map_err(GatewayError::Database)
    }

    async fn delete_old(&self, older_than_days: i64, max_rows: i64) -> Result<u64> {
        let threshold = Utc::now() - chrono::Duration::days(older_than_days);
        let result = sqlx::query(
            "DELETE FROM usage_events WHERE rowid IN (
                SELECT rowid FROM usage_events WHERE synced = 1 AND event_time < ?1 LIMIT ?2
             )",
        )
        .bind(threshold.to_rfc3339())
        .bind(max_rows)
        .execute(&self.pool)
        .await
        .map_err(GatewayError::Database)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SyncStatusRepository for SqliteRepositories {
    async fn upsert(&self, status: &SyncStatus) -> Result<()> {
        sqlx::query(
            "INSERT INTO billing_sync_status (device_id, degraded, last_sync)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(device_id) DO UPDATE SET
                degraded = excluded.degraded, last_sync = excluded.last_sync",
        )
        .bind(&status.device_id)
        .bind(status.degraded as i64)
        .bind(status.last_sync.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(GatewayError::Database)?;
        Ok(())
    }

    async fn find(&self, device_id: &str) -> Result<Option<SyncStatus>> {
        let row = sqlx::query("SELECT * FROM billing_sync_status WHERE device_id = ?1")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(GatewayError::Database)?;
        match row {
            None => Ok(None),
            Some(row) => Ok(Some(SyncStatus {
                device_id: row.try_get("device_id").map_err(GatewayError::Database)?,
                degraded: row.try_get::<i64, _>("degraded").map_err(GatewayError::Database)? != 0,
                last_sync: parse_rfc3339(&row.try_get::<String, _>("last_sync").map_err(GatewayError::Database)?)?,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CameraLicense;

    async fn repo() -> SqliteRepositories {
        SqliteRepositories::connect("sqlite::memory:").await.unwrap()
    }

    fn license(camera_id: &str, tenant_id: &str, mode: LicenseMode, valid_until: DateTime<Utc>) -> CameraLicense {
        let now = Utc::now();
        CameraLicense {
            camera_id: camera_id.to_string(),
            tenant_id: tenant_id.to_string(),
            device_id: "dev1".to_string(),
            mode,
            is_valid: mode != LicenseMode::Unlicensed,
            valid_until,
            enabled_growth_packs: Vec::new(),
            last_validated: now,
            created_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn license_upsert_then_find_round_trips() {
        let repo = repo().await;
        let l = license("cam1", "T1", LicenseMode::Trial, Utc::now() + chrono::Duration::days(90));
        CameraLicenseRepository::upsert(&repo, &l).await.unwrap();

        let found = CameraLicenseRepository::find(&repo, "cam1").await.unwrap().unwrap();
        assert_eq!(found.camera_id, "cam1");
        assert_eq!(found.mode, LicenseMode::Trial);
        assert!(found.is_valid);

        assert!(CameraLicenseRepository::find(&repo, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn license_upsert_is_an_update_not_a_duplicate() {
        let repo = repo().await;
        let future = Utc::now() + chrono::Duration::days(90);
        CameraLicenseRepository::upsert(&repo, &license("cam1", "T1", LicenseMode::Trial, future)).await.unwrap();
        CameraLicenseRepository::upsert(&repo, &license("cam1", "T1", LicenseMode::Base, future)).await.unwrap();

        assert_eq!(repo.count_active_trials("T1").await.unwrap(), 0);
        let found = CameraLicenseRepository::find(&repo, "cam1").await.unwrap().unwrap();
        assert_eq!(found.mode, LicenseMode::Base);
    }

    #[tokio::test]
    async fn count_active_trials_ignores_expired_and_other_tenants() {
        let repo = repo().await;
        let future = Utc::now() + chrono::Duration::days(1);
        let past = Utc::now() - chrono::Duration::days(1);
        CameraLicenseRepository::upsert(&repo, &license("cam1", "T1", LicenseMode::Trial, future)).await.unwrap();
        CameraLicenseRepository::upsert(&repo, &license("cam2", "T1", LicenseMode::Trial, past)).await.unwrap();
        CameraLicenseRepository::upsert(&repo, &license("cam3", "T2", LicenseMode::Trial, future)).await.unwrap();

        assert_eq!(repo.count_active_trials("T1").await.unwrap(), 1);
        assert_eq!(repo.count_active_trials("T2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_removes_the_license_row() {
        let repo = repo().await;
        CameraLicenseRepository::upsert(&repo, &license("cam1", "T1", LicenseMode::Trial, Utc::now() + chrono::Duration::days(1)))
            .await
            .unwrap();
        CameraLicenseRepository::delete(&repo, "cam1").await.unwrap();
        assert!(CameraLicenseRepository::find(&repo, "cam1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_batch_persists_all_events_in_one_transaction() {
        let repo = repo().await;
        let events = vec![
            UsageEvent::new("T1", "dev1", Some("cam1".into()), UsageEventType::ApiCall, 1.0, "calls", serde_json::json!({})),
            UsageEvent::new("T1", "dev1", Some("cam1".into()), UsageEventType::ApiCall, 2.0, "calls", serde_json::json!({})),
        ];
        UsageEventRepository::save_batch(&repo, &events).await.unwrap();

        let unsynced = repo.find_unsynced(10).await.unwrap();
        assert_eq!(unsynced.len(), 2);
        assert!(unsynced.iter().all(|e| !e.synced));
    }

    #[tokio::test]
    async fn mark_synced_is_idempotent() {
        let repo = repo().await;
        let event = UsageEvent::new("T1", "dev1", None, UsageEventType::ApiCall, 1.0, "calls", serde_json::json!({}));
        let id = event.id.clone();
        UsageEventRepository::save_batch(&repo, &[event]).await.unwrap();

        repo.mark_synced(&[id.clone()]).await.unwrap();
        repo.mark_synced(&[id.clone()]).await.unwrap();

        assert!(repo.find_unsynced(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_unsynced_respects_limit_and_submission_order() {
        let repo = repo().await;
        for i in 0..5 {
            let event = UsageEvent::new("T1", "dev1", None, UsageEventType::ApiCall, i as f64, "calls", serde_json::json!({}));
            UsageEventRepository::save_batch(&repo, &[event]).await.unwrap();
        }
        let page = repo.find_unsynced(2).await.unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn increment_quota_accumulates_and_missing_key_is_none() {
        let repo = repo().await;
        let entitlement = FeatureEntitlement {
            tenant_id: "T1".to_string(),
            category: "analytics".to_string(),
            feature: "zone_events".to_string(),
            enabled: true,
            quota_limit: 100,
            quota_used: 0,
            valid_until: Utc::now() + chrono::Duration::days(30),
            last_checked: Utc::now(),
        };
        FeatureEntitlementRepository::upsert(&repo, &entitlement).await.unwrap();

        let after = repo.increment_quota("T1", "analytics", "zone_events", 5).await.unwrap().unwrap();
        assert_eq!(after.quota_used, 5);
        let after2 = repo.increment_quota("T1", "analytics", "zone_events", 5).await.unwrap().unwrap();
        assert_eq!(after2.quota_used, 10);
        assert_eq!(after2.quota_remaining(), 90);

        let missing = repo.increment_quota("T1", "analytics", "no_such_feature", 1).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn clear_stale_removes_only_rows_past_the_threshold() {
        let repo = repo().await;
        let mut fresh = FeatureEntitlement {
            tenant_id: "T1".to_string(),
            category: "analytics".to_string(),
            feature: "fresh".to_string(),
            enabled: true,
            quota_limit: -1,
            quota_used: 0,
            valid_until: Utc::now() + chrono::Duration::days(1),
            last_checked: Utc::now(),
        };
        let mut stale = fresh.clone();
        stale.feature = "stale".to_string();
        stale.last_checked = Utc::now() - chrono::Duration::days(2);

        FeatureEntitlementRepository::upsert(&repo, &fresh).await.unwrap();
        FeatureEntitlementRepository::upsert(&repo, &stale).await.unwrap();

        let cleared = repo.clear_stale(60, 100).await.unwrap();
        assert_eq!(cleared, 1);
        assert!(FeatureEntitlementRepository::find(&repo, "T1", "analytics", "stale").await.unwrap().is_none());
        fresh.last_checked = Utc::now();
        assert!(FeatureEntitlementRepository::find(&repo, "T1", "analytics", "fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn edge_device_upsert_round_trips() {
        let repo = repo().await;
        let device = EdgeDevice {
            device_id: "dev1".to_string(),
            tenant_id: "T1".to_string(),
            management_tier: "basic".to_string(),
            last_heartbeat: Utc::now(),
        };
        EdgeDeviceRepository::upsert(&repo, &device).await.unwrap();
        let found = EdgeDeviceRepository::find(&repo, "dev1").await.unwrap().unwrap();
        assert_eq!(found.tenant_id, "T1");
    }
}
