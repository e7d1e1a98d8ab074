// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Shared data-model types for the entitlement & license plane.
//!
//! These types cross the repository / cache / plane boundaries, so they
//! live in one place rather than being duplicated per module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Commercial mode a camera license can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseMode {
    Trial,
    Base,
    Unlicensed,
}

impl LicenseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseMode::Trial => "trial",
            LicenseMode::Base => "base",
            LicenseMode::Unlicensed => "unlicensed",
        }
    }
}

impl std::str::FromStr for LicenseMode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "trial" => Ok(LicenseMode::Trial),
            "base" => Ok(LicenseMode::Base),
            _ => Ok(LicenseMode::Unlicensed),
        }
    }
}

/// Row of the `camera_licenses` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraLicense {
    pub camera_id: String,
    pub tenant_id: String,
    pub device_id: String,
    pub mode: LicenseMode,
    pub is_valid: bool,
    pub valid_until: DateTime<Utc>,
    pub enabled_growth_packs: Vec<String>,
    pub last_validated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Present only on degraded-mode responses; never persisted verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CameraLicense {
    /// The deterministic "unlicensed, invalid" fallback used whenever the
    /// remote billing service is unreachable and there is nothing cached
    /// or stored to fall back to.
    pub fn unlicensed(camera_id: &str, tenant_id: &str, device_id: &str) -> Self {
        let now = Utc::now();
        CameraLicense {
            camera_id: camera_id.to_string(),
            tenant_id: tenant_id.to_string(),
            device_id: device_id.to_string(),
            mode: LicenseMode::Unlicensed,
            is_valid: false,
            valid_until: now,
            enabled_growth_packs: Vec::new(),
            last_validated: now,
            created_at: now,
            updated_at: now,
            error_message: None,
        }
    }
}

/// Feature category enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    CvModels,
    Analytics,
    Outputs,
    Storage,
    LlmSeats,
    Agents,
    ApiCalls,
    Integrations,
}

impl FeatureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureCategory::CvModels => "cv_models",
            FeatureCategory::Analytics => "analytics",
            FeatureCategory::Outputs => "outputs",
            FeatureCategory::Storage => "storage",
            FeatureCategory::LlmSeats => "llm_seats",
            FeatureCategory::Agents => "agents",
            FeatureCategory::ApiCalls => "api_calls",
            FeatureCategory::Integrations => "integrations",
        }
    }
}

impl std::fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Row of the `feature_entitlements` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEntitlement {
    pub tenant_id: String,
    pub category: String,
    pub feature: String,
    pub enabled: bool,
    /// -1 means unlimited.
    pub quota_limit: i64,
    pub quota_used: i64,
    pub valid_until: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
}

impl FeatureEntitlement {
    /// (limit = -1) ? -1 : max(0, limit - used).
    pub fn quota_remaining(&self) -> i64 {
        if self.quota_limit < 0 {
            -1
        } else {
            (self.quota_limit - self.quota_used).max(0)
        }
    }

    pub fn disabled(tenant_id: &str, category: &str, feature: &str) -> Self {
        let now = Utc::now();
        FeatureEntitlement {
            tenant_id: tenant_id.to_string(),
            category: category.to_string(),
            feature: feature.to_string(),
            enabled: false,
            quota_limit: 0,
            quota_used: 0,
            valid_until: now,
            last_checked: now,
        }
    }
}

/// Usage event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageEventType {
    ApiCall,
    LlmTokens,
    StorageGbDays,
    SmsSent,
    AgentExecution,
    CloudExportGb,
    WebhookCall,
    EmailSent,
}

impl UsageEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageEventType::ApiCall => "api_call",
            UsageEventType::LlmTokens => "llm_tokens",
            UsageEventType::StorageGbDays => "storage_gb_days",
            UsageEventType::SmsSent => "sms_sent",
            UsageEventType::AgentExecution => "agent_execution",
            UsageEventType::CloudExportGb => "cloud_export_gb",
            UsageEventType::WebhookCall => "webhook_call",
            UsageEventType::EmailSent => "email_sent",
        }
    }
}

/// Row of the `usage_events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: String,
    pub tenant_id: String,
    pub device_id: String,
    pub camera_id: Option<String>,
    pub event_type: UsageEventType,
    pub quantity: f64,
    pub unit: String,
    pub metadata: serde_json::Value,
    pub event_time: DateTime<Utc>,
    pub synced: bool,
}

impl UsageEvent {
    pub fn new(
        tenant_id: impl Into<String>,
        device_id: impl Into<String>,
        camera_id: Option<String>,
        event_type: UsageEventType,
        quantity: f64,
        unit: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        UsageEvent {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            device_id: device_id.into(),
            camera_id,
            event_type,
            quantity,
            unit: unit.into(),
            metadata,
            event_time: Utc::now(),
            synced: false,
        }
    }
}

/// Task execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Row tracked by the task executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub task_type: String,
    pub target_id: String,
    pub state: TaskState,
    pub progress: f32,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn not_found(task_id: &str) -> Self {
        let now = Utc::now();
        TaskRecord {
            task_id: task_id.to_string(),
            task_type: String::new(),
            target_id: String::new(),
            state: TaskState::Failed,
            progress: 0.0,
            message: "Task not found".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Row of `billing_sync_status`: one per device, tracks degraded mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub device_id: String,
    pub degraded: bool,
    pub last_sync: DateTime<Utc>,
}
