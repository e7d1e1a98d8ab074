// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

/// Top-level error type surfaced to callers of the gateway's public API.
///
/// Variants map onto the error kinds every component is expected to
/// distinguish: not-found is folded into `Option`/`Result` at the call site
/// rather than represented here, since it is benign by definition.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("license limit exceeded for tenant '{tenant_id}' (limit {limit})")]
    LicenseLimitExceeded { tenant_id: String, limit: i64 },

    #[error("license issue failed for camera '{camera_id}': {reason}")]
    LicenseIssueFailed { camera_id: String, reason: String },

    #[error("camera '{id}' already registered")]
    CameraAlreadyExists { id: String },

    #[error("camera '{id}' not found")]
    CameraNotFound { id: String },

    #[error("zone '{id}' invalid: {reason}")]
    InvalidZone { id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("billing client error: {0}")]
    Billing(String),

    #[error("request timed out: {0}")]
    Timeout(String),
}

impl GatewayError {
    /// Whether this error should be treated as "backend unavailable" for the
    /// purposes of degraded-mode / backoff fallback (timeouts included).
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            GatewayError::BackendUnavailable(_)
                | GatewayError::Timeout(_)
                | GatewayError::Database(_)
                | GatewayError::Cache(_)
                | GatewayError::Billing(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
