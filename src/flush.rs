use crate::buffer::DeviceBuffer;
use crate::lock::FlushCoordinator;
use crate::reading::ModelKind;
use crate::stats::PipelineStats;
use crate::store::ReadingStore;
use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// The job payload consumed by flush workers. Carries no reading data — the
/// Device Buffer is the source of truth, so the job can be re-derived and is
/// idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushUnit {
    pub device_id: String,
    pub model: ModelKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Drained readings persisted and marked flushed.
    Flushed(usize),
    /// Unflushed count still below the batch threshold; nothing written.
    Pending(usize),
    Empty,
    /// Another flush holds the device lock.
    Locked,
    Failed(String),
}

pub struct FlushProcessor {
    buffer: DeviceBuffer,
    coordinator: FlushCoordinator,
    store: Arc<dyn ReadingStore>,
    batch_threshold: usize,
    stats: Arc<PipelineStats>,
}

impl FlushProcessor {
    pub fn new(
        buffer: DeviceBuffer,
        coordinator: FlushCoordinator,
        store: Arc<dyn ReadingStore>,
        batch_threshold: usize,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            buffer,
            coordinator,
            store,
            batch_threshold: batch_threshold.max(1),
            stats,
        }
    }

    /// Failed or skipped attempts are never re-enqueued; the per-device lock
    /// is the correctness mechanism and the next naturally arriving trigger
    /// retries.
    pub async fn flush(&self, unit: &FlushUnit) -> FlushOutcome {
        let guard = match self.coordinator.acquire(&unit.device_id).await {
            Ok(Some(guard)) => guard,
            Ok(None) => return FlushOutcome::Locked,
            Err(err) => {
                self.stats.record_error(err.to_string());
                return FlushOutcome::Failed(err.to_string());
            }
        };

        let outcome = match self.run_locked(unit).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.stats.record_error(err.to_string());
                FlushOutcome::Failed(err.to_string())
            }
        };
        guard.release().await;
        outcome
    }

    async fn run_locked(&self, unit: &FlushUnit) -> Result<FlushOutcome> {
        let drained = self.buffer.drain_unflushed(&unit.device_id).await?;
        if drained.is_empty() {
            return Ok(FlushOutcome::Empty);
        }
        if drained.len() < self.batch_threshold {
            return Ok(FlushOutcome::Pending(drained.len()));
        }

        let readings: Vec<_> = drained.iter().map(|(_, reading)| reading.clone()).collect();
        let report = self.store.bulk_insert(unit.model, &readings).await?;

        // Only the keys drained above: readings appended while the insert ran
        // stay unflushed for the next batch.
        let keys: Vec<String> = drained.into_iter().map(|(key, _)| key).collect();
        self.buffer.mark_flushed(&unit.device_id, &keys).await?;

        self.stats
            .flushed_rows
            .fetch_add(report.inserted as u64, Ordering::Relaxed);
        self.stats
            .last_flush_unix_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Relaxed);
        self.stats.clear_error();
        tracing::debug!(
            device = %unit.device_id,
            model = %unit.model.as_str(),
            rows = keys.len(),
            inserted = report.inserted,
            skipped = report.skipped,
            "flushed device batch"
        );
        Ok(FlushOutcome::Flushed(keys.len()))
    }
}
