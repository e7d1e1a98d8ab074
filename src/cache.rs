// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Two-level cache: an in-process map fronting a remote
//! key/value store, both TTL-scoped.
//!
//! Tier 1 is a `parking_lot`-guarded `HashMap`; tier 2 is Redis. Reads
//! consult tier 1 first, then tier 2 (repopulating tier 1 on a tier-2 hit).
//! Writes go to both; a tier-2 failure is logged and dropped, never
//! propagated, so the service can run on tier 1 alone during an outage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::AsyncCommands;
use tracing::warn;

use crate::error::Result;

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Two-tier TTL cache. Cheap to clone: the in-process tier is behind an
/// `Arc<Mutex<_>>` and the Redis client is itself a cheap handle.
#[derive(Clone)]
pub struct TieredCache {
    tier1: Arc<Mutex<HashMap<String, Entry>>>,
    tier2: Option<redis::aio::ConnectionManager>,
    max_retries: u32,
}

impl TieredCache {
    /// Tier-1-only cache with no remote backing, for tests and for
    /// deliberately offline configurations.
    pub fn tier1_only() -> Self {
        TieredCache { tier1: Arc::new(Mutex::new(HashMap::new())), tier2: None, max_retries: 0 }
    }

    /// Connect to Redis at `redis_url`. A connection failure here is
    /// non-fatal: the cache degrades to tier-1-only operation, matching the
    /// degraded-mode tolerance: tier-2 failures never block a caller.
    pub async fn connect(redis_url: &str, max_retries: u32) -> Self {
        let tier2 = match redis::Client::open(redis_url) {
            Ok(client) => match client.get_connection_manager().await {
                Ok(mgr) => Some(mgr),
                Err(e) => {
                    warn!(error = %e, "Redis unavailable at startup, running tier-1-only");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Invalid redis_url, running tier-1-only");
                None
            }
        };
        TieredCache {
            tier1: Arc::new(Mutex::new(HashMap::new())),
            tier2,
            max_retries,
        }
    }

    /// Read path: tier 1 first, then tier 2 with tier-1 repopulation.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(v) = self.get_tier1(key) {
            return Some(v);
        }

        let Some(mut conn) = self.tier2.clone() else {
            return None;
        };

        let mut attempt = 0;
        loop {
            let result: redis::RedisResult<(Option<String>, Option<i64>)> = async {
                let value: Option<String> = conn.get(key).await?;
                let ttl: Option<i64> = conn.ttl(key).await?;
                Ok((value, ttl))
            }
            .await;

            match result {
                Ok((Some(value), ttl)) => {
                    let ttl_secs = ttl.filter(|t| *t > 0).unwrap_or(0);
                    self.set_tier1(key, &value, ttl_secs);
                    return Some(value);
                }
                Ok((None, _)) => return None,
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(key, error = %e, "tier-2 GET failed after retries");
                        return None;
                    }
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
            }
        }
    }

    /// Write path: tier 1 unconditionally, tier 2 best-effort.
    /// `ttl_seconds = 0` means "do not cache".
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: i64) {
        if ttl_seconds <= 0 {
            self.invalidate(key).await;
            return;
        }
        self.set_tier1(key, value, ttl_seconds);

        let Some(mut conn) = self.tier2.clone() else {
            return;
        };

        let mut attempt = 0;
        loop {
            let result: redis::RedisResult<()> = conn
                .set_ex(key, value, ttl_seconds as u64)
                .await;
            match result {
                Ok(()) => return,
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(key, error = %e, "tier-2 SET failed after retries, tier-1 still authoritative");
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
            }
        }
    }

    /// Invalidate path: remove from tier 1, then tier 2.
    pub async fn invalidate(&self, key: &str) {
        self.tier1.lock().remove(key);
        if let Some(mut conn) = self.tier2.clone() {
            let _: redis::RedisResult<()> = conn.del(key).await;
        }
    }

    /// Coarser but correct: pattern-delete on tier 2, full clear on tier 1.
    pub async fn invalidate_pattern(&self, pattern: &str) {
        self.tier1.lock().clear();
        let Some(mut conn) = self.tier2.clone() else {
            return;
        };
        let keys: redis::RedisResult<Vec<String>> = conn.keys(pattern).await;
        if let Ok(keys) = keys {
            if !keys.is_empty() {
                let _: redis::RedisResult<()> = conn.del(keys).await;
            }
        }
    }

    fn get_tier1(&self, key: &str) -> Option<String> {
        let guard = self.tier1.lock();
        let entry = guard.get(key)?;
        if entry.expires_at > Utc::now() {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn set_tier1(&self, key: &str, value: &str, ttl_seconds: i64) {
        let mut guard = self.tier1.lock();
        guard.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Utc::now() + chrono::Duration::seconds(ttl_seconds.max(1)),
            },
        );
    }
}

/// Serialises a cacheable payload and stores it with the given TTL.
pub async fn set_json<T: serde::Serialize>(cache: &TieredCache, key: &str, value: &T, ttl_seconds: i64) -> Result<()> {
    let json = serde_json::to_string(value).map_err(|e| crate::error::GatewayError::Cache(e.to_string()))?;
    cache.set(key, &json, ttl_seconds).await;
    Ok(())
}

/// Reads and deserialises a cached payload, if present and still fresh.
pub async fn get_json<T: serde::de::DeserializeOwned>(cache: &TieredCache, key: &str) -> Option<T> {
    let raw = cache.get(key).await?;
    serde_json::from_str(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tier1_only_roundtrip_without_redis() {
        let cache = TieredCache {
            tier1: Arc::new(Mutex::new(HashMap::new())),
            tier2: None,
            max_retries: 1,
        };
        cache.set("k", "v", 60).await;
        assert_eq!(cache.get("k").await, Some("v".to_string()));
        cache.invalidate("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn zero_ttl_means_do_not_cache() {
        let cache = TieredCache {
            tier1: Arc::new(Mutex::new(HashMap::new())),
            tier2: None,
            max_retries: 1,
        };
        cache.set("k", "v", 0).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn expired_tier1_entry_is_not_returned() {
        let cache = TieredCache {
            tier1: Arc::new(Mutex::new(HashMap::new())),
            tier2: None,
            max_retries: 1,
        };
        cache.tier1.lock().insert(
            "k".to_string(),
            Entry { value: "v".to_string(), expires_at: Utc::now() - chrono::Duration::seconds(1) },
        );
        assert_eq!(cache.get("k").await, None);
    }
}
