use crate::kv::{KvError, KvStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Per-device mutual exclusion for flush runs. The lock key expires on its
/// own, so a crashed holder cannot strand a device's buffer.
pub struct FlushCoordinator {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl FlushCoordinator {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// `Ok(None)` means another flush holds the lock — a normal outcome, not
    /// a fault.
    pub async fn acquire(&self, device_id: &str) -> Result<Option<FlushLockGuard>, KvError> {
        let key = lock_key(device_id);
        let acquired = self
            .kv
            .create_if_absent(&key, &Utc::now().to_rfc3339(), self.ttl)
            .await?;
        if !acquired {
            return Ok(None);
        }
        Ok(Some(FlushLockGuard {
            kv: self.kv.clone(),
            key,
        }))
    }
}

pub struct FlushLockGuard {
    kv: Arc<dyn KvStore>,
    key: String,
}

impl FlushLockGuard {
    pub async fn release(self) {
        if let Err(err) = self.kv.delete(&self.key).await {
            // The TTL reclaims the lock if the delete is lost.
            tracing::warn!(error = %err, key = %self.key, "failed to release flush lock");
        }
    }
}

fn lock_key(device_id: &str) -> String {
    format!("flushlock:{device_id}")
}
