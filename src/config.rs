use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{GatewayError, Result};

/// Top-level configuration loaded from a TOML file, then patched by
/// environment variables (environment always wins over file, file always
/// wins over built-in defaults).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub device: DeviceConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub usage: UsageConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// Cameras known at startup; the registry may add more at runtime.
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    /// Growth-pack → feature mapping, loaded once and treated as immutable
    /// for the lifetime of the process (see design note on the global
    /// mutable growth-pack cache).
    #[serde(default)]
    pub growth_packs: std::collections::HashMap<String, Vec<GrowthPackFeature>>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash)]
pub struct GrowthPackFeature {
    pub category: String,
    pub feature: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// "auto" derives a random UUID once and thereafter re-reads the same
    /// generated id from a local marker file beside the sqlite database;
    /// any other value is used verbatim.
    #[serde(default = "default_device_id")]
    pub device_id: String,
    pub tenant_id: String,
    #[serde(default = "default_management_tier")]
    pub management_tier: String,
}

fn default_device_id() -> String {
    "auto".to_string()
}
fn default_management_tier() -> String {
    "basic".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    #[serde(default = "default_billing_url")]
    pub service_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_billing_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_billing_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_trial_camera_limit")]
    pub trial_camera_limit: i64,
    #[serde(default = "default_offline_grace_period_hours")]
    pub offline_grace_period_hours: i64,
    #[serde(default)]
    pub mock: bool,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            service_url: default_billing_url(),
            api_key: String::new(),
            timeout_ms: default_billing_timeout_ms(),
            max_retries: default_billing_max_retries(),
            trial_camera_limit: default_trial_camera_limit(),
            offline_grace_period_hours: default_offline_grace_period_hours(),
            mock: false,
        }
    }
}

fn default_billing_url() -> String {
    "https://billing.example.com/api/v1".to_string()
}
fn default_billing_timeout_ms() -> u64 {
    5000
}
fn default_billing_max_retries() -> u32 {
    3
}
fn default_trial_camera_limit() -> i64 {
    2
}
fn default_offline_grace_period_hours() -> i64 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_license_ttl")]
    pub license_ttl_seconds: i64,
    #[serde(default = "default_entitlement_ttl")]
    pub entitlement_ttl_seconds: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            license_ttl_seconds: default_license_ttl(),
            entitlement_ttl_seconds: default_entitlement_ttl(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_license_ttl() -> i64 {
    3600
}
fn default_entitlement_ttl() -> i64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// SQLite connection string, e.g. `sqlite://gateway.db` or
    /// `sqlite::memory:` for tests.
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_url: default_database_url() }
    }
}

fn default_database_url() -> String {
    "sqlite://gateway.db".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UsageConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_interval_secs")]
    pub batch_interval_seconds: u64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_interval_seconds: default_batch_interval_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    1000
}
fn default_batch_interval_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub enable_license_validation: bool,
    #[serde(default = "default_true")]
    pub enable_usage_tracking: bool,
    #[serde(default = "default_true")]
    pub enable_heartbeat: bool,
    #[serde(default = "default_true")]
    pub enable_offline_mode: bool,
    /// DANGEROUS: bypass all license checks. Dev only.
    #[serde(default)]
    pub bypass_license_check: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_license_validation: true,
            enable_usage_tracking: true,
            enable_heartbeat: true,
            enable_offline_mode: true,
            bypass_license_check: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Minimal operator-facing status surface configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: default_api_enabled(), port: default_api_port() }
    }
}

fn default_api_enabled() -> bool {
    true
}
fn default_api_port() -> u16 {
    8080
}

/// Periodic maintenance sweeps: heartbeat and stale-entitlement cleanup,
/// run by the gateway alongside its other background tasks.
#[derive(Debug, Deserialize, Clone)]
pub struct MaintenanceConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_entitlement_sweep_interval_secs")]
    pub entitlement_sweep_interval_seconds: u64,
    #[serde(default = "default_entitlement_stale_minutes")]
    pub entitlement_stale_minutes: i64,
    #[serde(default = "default_task_cleanup_max_age_secs")]
    pub task_cleanup_max_age_seconds: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: default_heartbeat_interval_secs(),
            entitlement_sweep_interval_seconds: default_entitlement_sweep_interval_secs(),
            entitlement_stale_minutes: default_entitlement_stale_minutes(),
            task_cleanup_max_age_seconds: default_task_cleanup_max_age_secs(),
        }
    }
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}
fn default_entitlement_sweep_interval_secs() -> u64 {
    600
}
fn default_entitlement_stale_minutes() -> i64 {
    1440
}
fn default_task_cleanup_max_age_secs() -> i64 {
    3600
}

/// Per-camera configuration known ahead of time (additional cameras may be
/// registered at runtime through the camera registry).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

fn default_tenant() -> String {
    "default".to_string()
}

impl Config {
    /// Load configuration from a TOML file at `path`, then apply
    /// environment-variable overrides, resolve `device_id = "auto"`, then
    /// validate.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("Cannot read config file: {e}")))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("Invalid TOML: {e}")))?;
        config.apply_env_overrides();
        config.resolve_device_id();
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `device_id` of "auto" to a generated uuid, persisted in a
    /// marker file beside the sqlite database so it survives restarts.
    /// Any other value is left untouched.
    fn resolve_device_id(&mut self) {
        if self.device.device_id != "auto" {
            return;
        }
        let marker = self.device_id_marker_path();
        self.device.device_id = match std::fs::read_to_string(&marker) {
            Ok(existing) if !existing.trim().is_empty() => existing.trim().to_string(),
            _ => {
                let generated = uuid::Uuid::new_v4().to_string();
                if let Some(parent) = marker.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(&marker, &generated) {
                    tracing::warn!(error = %e, "failed to persist generated device id, it will not survive a restart");
                }
                generated
            }
        };
    }

    fn device_id_marker_path(&self) -> PathBuf {
        let db_path = self.storage.database_url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
        if db_path.is_empty() || db_path.contains("memory") {
            return PathBuf::from(".edge_device_id");
        }
        let mut path = PathBuf::from(db_path);
        path.set_file_name(".edge_device_id");
        path
    }

    /// Apply the documented environment-variable overrides. Environment
    /// wins over file.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BILLING_SERVICE_URL") {
            self.billing.service_url = v;
        }
        if let Ok(v) = std::env::var("BILLING_API_KEY") {
            self.billing.api_key = v;
        }
        if let Ok(v) = std::env::var("BILLING_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.billing.timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("BILLING_MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.billing.max_retries = n;
            }
        }
        if let Ok(v) = std::env::var("MOCK_BILLING_SERVICE") {
            self.billing.mock = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("EDGE_DEVICE_ID") {
            self.device.device_id = v;
        }
        if let Ok(v) = std::env::var("TENANT_ID") {
            self.device.tenant_id = v;
        }
        if let Ok(v) = std::env::var("MANAGEMENT_TIER") {
            self.device.management_tier = v;
        }
        if let Ok(v) = std::env::var("LICENSE_CACHE_TTL_SECONDS") {
            if let Ok(n) = v.parse() {
                self.cache.license_ttl_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("ENTITLEMENT_CACHE_TTL_SECONDS") {
            if let Ok(n) = v.parse() {
                self.cache.entitlement_ttl_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("BYPASS_LICENSE_CHECK") {
            self.features.bypass_license_check = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("ENABLE_LICENSE_VALIDATION") {
            self.features.enable_license_validation = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("ENABLE_USAGE_TRACKING") {
            self.features.enable_usage_tracking = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("ENABLE_HEARTBEAT") {
            self.features.enable_heartbeat = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("ENABLE_OFFLINE_MODE") {
            self.features.enable_offline_mode = parse_bool(&v);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.device.tenant_id.is_empty() {
            return Err(GatewayError::Config("device.tenant_id must not be empty".into()));
        }
        if self.usage.batch_size == 0 {
            return Err(GatewayError::Config("usage.batch_size must be > 0".into()));
        }
        if self.billing.trial_camera_limit < 0 {
            return Err(GatewayError::Config("billing.trial_camera_limit must be >= 0".into()));
        }
        if self.cache.license_ttl_seconds < 0 || self.cache.entitlement_ttl_seconds < 0 {
            return Err(GatewayError::Config("cache TTLs must be >= 0".into()));
        }
        Ok(())
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(database_url: String) -> Config {
        Config {
            device: DeviceConfig { device_id: "auto".to_string(), tenant_id: "t1".to_string(), management_tier: "basic".to_string() },
            billing: BillingConfig::default(),
            cache: CacheConfig::default(),
            storage: StorageConfig { database_url },
            usage: UsageConfig::default(),
            features: FeatureFlags::default(),
            api: ApiConfig::default(),
            maintenance: MaintenanceConfig::default(),
            cameras: Vec::new(),
            growth_packs: Default::default(),
        }
    }

    #[test]
    fn auto_device_id_is_generated_and_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let db_url = format!("sqlite://{}/gateway.db", dir.path().display());

        let mut first = base_config(db_url.clone());
        first.resolve_device_id();
        assert_ne!(first.device.device_id, "auto");

        let mut second = base_config(db_url);
        second.resolve_device_id();
        assert_eq!(first.device.device_id, second.device.device_id);
    }

    #[test]
    fn explicit_device_id_is_left_untouched() {
        let mut config = base_config("sqlite::memory:".to_string());
        config.device.device_id = "fixed-id".to_string();
        config.resolve_device_id();
        assert_eq!(config.device.device_id, "fixed-id");
    }
}
