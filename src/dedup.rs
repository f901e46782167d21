use crate::kv::KvStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub struct DedupGuard {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl DedupGuard {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Returns `true` when the reading should enter the pipeline. A marker
    /// already present within the TTL window means a duplicate submission.
    /// An unreachable store admits the reading: duplicates are tolerable,
    /// dropped readings are not.
    pub async fn try_admit(&self, device_id: &str, captured_at: DateTime<Utc>) -> bool {
        let key = marker_key(device_id, captured_at);
        match self.kv.create_if_absent(&key, "1", self.ttl).await {
            Ok(created) => {
                if !created {
                    tracing::debug!(device = %device_id, captured_at = %captured_at, "skipping duplicate reading");
                }
                created
            }
            Err(err) => {
                tracing::warn!(error = %err, device = %device_id, "dedup store unreachable; admitting reading");
                true
            }
        }
    }
}

fn marker_key(device_id: &str, captured_at: DateTime<Utc>) -> String {
    format!("dedup:{}:{}", device_id, captured_at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::test_support::FlakyKv;

    #[tokio::test]
    async fn admits_once_within_window() {
        let guard = DedupGuard::new(Arc::new(MemoryKv::new()), Duration::from_secs(300));
        let at = Utc::now();
        assert!(guard.try_admit("d1", at).await);
        assert!(!guard.try_admit("d1", at).await);
        // Same capture time on another device is unrelated.
        assert!(guard.try_admit("d2", at).await);
    }

    #[tokio::test]
    async fn readmits_after_ttl() {
        let guard = DedupGuard::new(Arc::new(MemoryKv::new()), Duration::from_millis(20));
        let at = Utc::now();
        assert!(guard.try_admit("d1", at).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(guard.try_admit("d1", at).await);
    }

    #[tokio::test]
    async fn fails_open_when_store_unreachable() {
        let kv = Arc::new(FlakyKv::new());
        let guard = DedupGuard::new(kv.clone(), Duration::from_secs(300));
        kv.set_failing(true);
        let at = Utc::now();
        assert!(guard.try_admit("d1", at).await);
        assert!(guard.try_admit("d1", at).await);

        kv.set_failing(false);
        assert!(guard.try_admit("d1", at).await);
        assert!(!guard.try_admit("d1", at).await);
    }
}
