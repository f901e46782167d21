use crate::kv::{KvError, KvStore};
use crate::reading::{DeviceMeta, Reading};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Reserved hash field holding the device metadata snapshot; reading entry
/// keys always start with a digit, so the two can never collide.
const META_FIELD: &str = "meta";

#[derive(Debug, Error)]
pub enum BufferError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("buffer entry encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct DeviceBuffer {
    kv: Arc<dyn KvStore>,
}

impl DeviceBuffer {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Appends one reading and refreshes the metadata snapshot. Never blocks
    /// on or interacts with an in-progress flush.
    pub async fn append(&self, reading: &Reading, meta: &DeviceMeta) -> Result<String, BufferError> {
        let container = container_key(&reading.device_id);
        let entry_key = entry_key(reading.received_at);
        let encoded = serde_json::to_string(reading)?;
        self.kv.hash_set(&container, &entry_key, encoded).await?;
        self.kv
            .hash_set(&container, META_FIELD, serde_json::to_string(meta)?)
            .await?;
        Ok(entry_key)
    }

    /// All entries still awaiting durable persistence, oldest first, with
    /// the keys needed to mark exactly these entries afterwards.
    pub async fn drain_unflushed(&self, device_id: &str) -> Result<Vec<(String, Reading)>, BufferError> {
        let mut entries: Vec<(String, Reading)> = self
            .entries(device_id)
            .await?
            .into_iter()
            .filter(|(_, reading)| !reading.flushed)
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    /// Rewrites the named entries with `flushed = true`. Entries are kept for
    /// the read path; retention is a separate concern.
    pub async fn mark_flushed(&self, device_id: &str, keys: &[String]) -> Result<(), BufferError> {
        let container = container_key(device_id);
        for key in keys {
            let Some(encoded) = self.kv.hash_get(&container, key).await? else {
                continue;
            };
            let mut reading: Reading = serde_json::from_str(&encoded)?;
            if reading.flushed {
                continue;
            }
            reading.flushed = true;
            self.kv
                .hash_set(&container, key, serde_json::to_string(&reading)?)
                .await?;
        }
        Ok(())
    }

    /// Most recent `limit` readings, newest first, metadata excluded.
    pub async fn read_recent(&self, device_id: &str, limit: usize) -> Result<Vec<Reading>, BufferError> {
        let mut readings: Vec<Reading> = self
            .entries(device_id)
            .await?
            .into_iter()
            .map(|(_, reading)| reading)
            .collect();
        readings.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        readings.truncate(limit);
        Ok(readings)
    }

    pub async fn metadata(&self, device_id: &str) -> Result<Option<DeviceMeta>, BufferError> {
        let container = container_key(device_id);
        let Some(encoded) = self.kv.hash_get(&container, META_FIELD).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&encoded)?))
    }

    async fn entries(&self, device_id: &str) -> Result<Vec<(String, Reading)>, BufferError> {
        let container = container_key(device_id);
        let mut out = Vec::new();
        for (field, encoded) in self.kv.hash_get_all(&container).await? {
            if field == META_FIELD {
                continue;
            }
            match serde_json::from_str::<Reading>(&encoded) {
                Ok(reading) => out.push((field, reading)),
                Err(err) => {
                    tracing::warn!(device = %device_id, key = %field, error = %err, "skipping undecodable buffer entry");
                }
            }
        }
        Ok(out)
    }
}

fn container_key(device_id: &str) -> String {
    format!("buffer:{device_id}")
}

// Zero-padded millis keep lexicographic order chronological; the uuid suffix
// keeps concurrent same-millisecond appends distinct.
fn entry_key(received_at: DateTime<Utc>) -> String {
    format!(
        "{:013}-{}",
        received_at.timestamp_millis().max(0),
        Uuid::new_v4().simple()
    )
}
