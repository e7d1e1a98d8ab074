// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Remote billing RPC client. Opaque JSON over
//! HTTPS, bearer-authenticated. A `MockBillingClient` backs
//! `MOCK_BILLING_SERVICE=1` / test runs so the license plane and usage
//! tracker can be exercised without a live billing service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BillingConfig;
use crate::error::{GatewayError, Result};
use crate::models::{LicenseMode, UsageEvent};

#[derive(Debug, Clone, Serialize)]
pub struct LicenseValidateRequest<'a> {
    pub camera_id: &'a str,
    pub tenant_id: &'a str,
    pub device_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LicenseValidateResponse {
    pub is_valid: bool,
    pub license_mode: String,
    #[serde(default)]
    pub enabled_growth_packs: Vec<String>,
    pub valid_until: DateTime<Utc>,
    /// `null` means unlimited.
    #[serde(default)]
    pub cameras_allowed: Option<i64>,
}

impl LicenseValidateResponse {
    pub fn mode(&self) -> LicenseMode {
        self.license_mode.parse().unwrap_or(LicenseMode::Unlicensed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitlementCheckRequest<'a> {
    pub tenant_id: &'a str,
    pub feature_category: &'a str,
    pub feature_name: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntitlementCheckResponse {
    pub is_enabled: bool,
    pub quota_limit: i64,
    pub quota_used: i64,
    pub quota_remaining: i64,
    pub valid_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageBatchEvent {
    pub tenant_id: String,
    pub device_id: String,
    pub camera_id: Option<String>,
    pub event_type: String,
    pub quantity: f64,
    pub unit: String,
    pub metadata: serde_json::Value,
}

impl From<&UsageEvent> for UsageBatchEvent {
    fn from(e: &UsageEvent) -> Self {
        UsageBatchEvent {
            tenant_id: e.tenant_id.clone(),
            device_id: e.device_id.clone(),
            camera_id: e.camera_id.clone(),
            event_type: e.event_type.as_str().to_string(),
            quantity: e.quantity,
            unit: e.unit.clone(),
            metadata: e.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageBatchResponse {
    pub accepted_count: u32,
    pub rejected_count: u32,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatRequest<'a> {
    pub device_id: &'a str,
    pub tenant_id: &'a str,
    pub active_camera_ids: &'a [String],
    pub management_tier: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,
    pub next_heartbeat_seconds: u64,
}

/// The deadline-bounded remote billing collaborator: every remote RPC
/// has a bounded deadline. Every method maps transport/deadline errors
/// onto [`GatewayError::BackendUnavailable`] or [`GatewayError::Timeout`]
/// so callers can treat them uniformly for degraded-mode fallback.
#[async_trait]
pub trait BillingClient: Send + Sync {
    async fn validate_license(&self, req: LicenseValidateRequest<'_>) -> Result<LicenseValidateResponse>;
    async fn check_entitlement(&self, req: EntitlementCheckRequest<'_>) -> Result<EntitlementCheckResponse>;
    async fn submit_usage_batch(&self, events: &[UsageBatchEvent]) -> Result<UsageBatchResponse>;
    async fn heartbeat(&self, req: HeartbeatRequest<'_>) -> Result<HeartbeatResponse>;
    async fn health(&self) -> Result<bool>;
}

/// `reqwest`-backed HTTPS client for the real billing service.
pub struct HttpBillingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpBillingClient {
    pub fn new(config: &BillingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Billing(e.to_string()))?;
        Ok(HttpBillingClient {
            http,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn post<Req: Serialize + Sync, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(format!("{path}: {e}"))
                } else {
                    GatewayError::BackendUnavailable(format!("{path}: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(GatewayError::BackendUnavailable(format!(
                "{path} returned HTTP {}",
                response.status()
            )));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| GatewayError::Billing(format!("{path}: malformed response: {e}")))
    }
}

#[async_trait]
impl BillingClient for HttpBillingClient {
    async fn validate_license(&self, req: LicenseValidateRequest<'_>) -> Result<LicenseValidateResponse> {
        self.post("/license/validate", &req).await
    }

    async fn check_entitlement(&self, req: EntitlementCheckRequest<'_>) -> Result<EntitlementCheckResponse> {
        self.post("/entitlement/check", &req).await
    }

    async fn submit_usage_batch(&self, events: &[UsageBatchEvent]) -> Result<UsageBatchResponse> {
        #[derive(Serialize)]
        struct Envelope<'a> {
            events: &'a [UsageBatchEvent],
        }
        self.post("/usage/batch", &Envelope { events }).await
    }

    async fn heartbeat(&self, req: HeartbeatRequest<'_>) -> Result<HeartbeatResponse> {
        self.post("/heartbeat", &req).await
    }

    async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::BackendUnavailable(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

/// In-process stand-in used when `MOCK_BILLING_SERVICE=1`, and in tests.
/// Always grants a trial license with a configurable camera limit, and
/// accepts every entitlement check / usage batch.
pub struct MockBillingClient {
    pub trial_cameras_allowed: i64,
    pub fail: std::sync::atomic::AtomicBool,
}

impl Default for MockBillingClient {
    fn default() -> Self {
        MockBillingClient {
            trial_cameras_allowed: 2,
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl MockBillingClient {
    /// Toggle to simulate an outage for degraded-mode tests.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    fn failing(&self) -> bool {
        self.fail.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingClient for MockBillingClient {
    async fn validate_license(&self, _req: LicenseValidateRequest<'_>) -> Result<LicenseValidateResponse> {
        if self.failing() {
            return Err(GatewayError::BackendUnavailable("mock billing offline".into()));
        }
        Ok(LicenseValidateResponse {
            is_valid: true,
            license_mode: "trial".to_string(),
            enabled_growth_packs: Vec::new(),
            valid_until: Utc::now() + chrono::Duration::days(90),
            cameras_allowed: Some(self.trial_cameras_allowed),
        })
    }

    async fn check_entitlement(&self, req: EntitlementCheckRequest<'_>) -> Result<EntitlementCheckResponse> {
        if self.failing() {
            return Err(GatewayError::BackendUnavailable("mock billing offline".into()));
        }
        let _ = req;
        Ok(EntitlementCheckResponse {
            is_enabled: true,
            quota_limit: -1,
            quota_used: 0,
            quota_remaining: -1,
            valid_until: Utc::now() + chrono::Duration::days(90),
        })
    }

    async fn submit_usage_batch(&self, events: &[UsageBatchEvent]) -> Result<UsageBatchResponse> {
        if self.failing() {
            return Err(GatewayError::BackendUnavailable("mock billing offline".into()));
        }
        Ok(UsageBatchResponse {
            accepted_count: events.len() as u32,
            rejected_count: 0,
            errors: Vec::new(),
        })
    }

    async fn heartbeat(&self, _req: HeartbeatRequest<'_>) -> Result<HeartbeatResponse> {
        if self.failing() {
            return Err(GatewayError::BackendUnavailable("mock billing offline".into()));
        }
        Ok(HeartbeatResponse { status: "ok".to_string(), next_heartbeat_seconds: 60 })
    }

    async fn health(&self) -> Result<bool> {
        Ok(!self.failing())
    }
}
