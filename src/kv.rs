//! Key-value seam for the shared pipeline state (buffer entries, dedup
//! markers, flush locks). Implementations may be backed by any store that
//! offers conditional creation with expiry and per-container hashes; the
//! bundled [`MemoryKv`] serves tests and single-process deployments.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("key-value store protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Creates `key` only if absent, with `ttl` until expiry. Returns `true`
    /// when this call created the key.
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    async fn hash_set(&self, container: &str, field: &str, value: String) -> Result<(), KvError>;

    async fn hash_get(&self, container: &str, field: &str) -> Result<Option<String>, KvError>;

    async fn hash_get_all(&self, container: &str) -> Result<Vec<(String, String)>, KvError>;
}

// Scalar keys are only ever tested for existence, so just the deadline is
// kept.
#[derive(Debug)]
struct ExpiringMarker {
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct MemoryKvInner {
    scalars: HashMap<String, ExpiringMarker>,
    hashes: HashMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    inner: Mutex<MemoryKvInner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn create_if_absent(&self, key: &str, _value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if let Some(existing) = inner.scalars.get(key) {
            if existing.expires_at > now {
                return Ok(false);
            }
        }
        inner.scalars.insert(
            key.to_string(),
            ExpiringMarker {
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut inner = self.inner.lock().await;
        inner.scalars.remove(key);
        Ok(())
    }

    async fn hash_set(&self, container: &str, field: &str, value: String) -> Result<(), KvError> {
        let mut inner = self.inner.lock().await;
        inner
            .hashes
            .entry(container.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hash_get(&self, container: &str, field: &str) -> Result<Option<String>, KvError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .hashes
            .get(container)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hash_get_all(&self, container: &str) -> Result<Vec<(String, String)>, KvError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .hashes
            .get(container)
            .map(|hash| {
                hash.iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
