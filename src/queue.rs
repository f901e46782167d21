use crate::alerts::{AlertEngine, RuleStore};
use crate::buffer::DeviceBuffer;
use crate::config::Config;
use crate::dedup::DedupGuard;
use crate::flush::{FlushOutcome, FlushProcessor, FlushUnit};
use crate::kv::KvStore;
use crate::lock::FlushCoordinator;
use crate::notify::Notifier;
use crate::reading::{map_payload, DeviceMeta, ModelKind};
use crate::stats::PipelineStats;
use crate::store::ReadingStore;
use anyhow::Result;
use chrono::Utc;
use futures::future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One raw submission from the ingestion entrypoint. The caller has already
/// resolved `device_id` to a registered device; `route` implies the model.
#[derive(Debug, Clone)]
pub struct InboundReading {
    pub device_id: String,
    pub route: String,
    pub payload: Vec<u8>,
    pub meta: DeviceMeta,
}

#[derive(Clone)]
pub struct PipelineHandle {
    inbound_tx: mpsc::Sender<InboundReading>,
    flush_tx: mpsc::Sender<FlushUnit>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    pub async fn submit(&self, reading: InboundReading) -> Result<()> {
        let depth = self.stats.inbound_queue_depth.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(queue_depth = depth, device = %reading.device_id, "queued inbound reading");
        if let Err(err) = self.inbound_tx.send(reading).await {
            self.stats.inbound_queue_depth.fetch_sub(1, Ordering::Relaxed);
            return Err(err.into());
        }
        Ok(())
    }

    pub async fn request_flush(&self, unit: FlushUnit) -> Result<()> {
        let depth = self.stats.flush_queue_depth.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(queue_depth = depth, device = %unit.device_id, "queued flush unit");
        if let Err(err) = self.flush_tx.send(unit).await {
            self.stats.flush_queue_depth.fetch_sub(1, Ordering::Relaxed);
            return Err(err.into());
        }
        Ok(())
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }
}

pub struct PipelineWorkers {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl PipelineWorkers {
    /// Stops both dispatchers and waits for in-flight jobs to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = future::join_all(self.handles).await;
    }
}

pub struct Pipeline {
    dedup: DedupGuard,
    buffer: DeviceBuffer,
    alerts: AlertEngine,
    processor: FlushProcessor,
    stats: Arc<PipelineStats>,
    inbound_workers: usize,
    flush_workers: usize,
    inbound_queue: usize,
    flush_queue: usize,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        kv: Arc<dyn KvStore>,
        store: Arc<dyn ReadingStore>,
        rules: Arc<dyn RuleStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let stats = Arc::new(PipelineStats::new());
        let buffer = DeviceBuffer::new(kv.clone());
        let dedup = DedupGuard::new(kv.clone(), config.dedup_ttl());
        let coordinator = FlushCoordinator::new(kv, config.flush_lock_ttl());
        let processor = FlushProcessor::new(
            buffer.clone(),
            coordinator,
            store,
            config.batch_threshold,
            stats.clone(),
        );
        let alerts = AlertEngine::new(rules, notifier, stats.clone());
        Self {
            dedup,
            buffer,
            alerts,
            processor,
            stats,
            inbound_workers: config.inbound_workers.max(1),
            flush_workers: config.flush_workers.max(1),
            inbound_queue: config.inbound_queue.max(1),
            flush_queue: config.flush_queue.max(1),
        }
    }

    pub fn start(self) -> (PipelineHandle, PipelineWorkers) {
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundReading>(self.inbound_queue);
        let (flush_tx, flush_rx) = mpsc::channel::<FlushUnit>(self.flush_queue);
        let cancel = CancellationToken::new();

        let ctx = Arc::new(InboundCtx {
            dedup: self.dedup,
            buffer: self.buffer,
            alerts: self.alerts,
            flush_tx: flush_tx.clone(),
            stats: self.stats.clone(),
        });

        let inbound_handle = tokio::spawn(run_inbound_pool(
            inbound_rx,
            ctx,
            self.inbound_workers,
            cancel.clone(),
        ));
        let flush_handle = tokio::spawn(run_flush_pool(
            flush_rx,
            Arc::new(self.processor),
            self.stats.clone(),
            self.flush_workers,
            cancel.clone(),
        ));

        let handle = PipelineHandle {
            inbound_tx,
            flush_tx,
            stats: self.stats,
        };
        let workers = PipelineWorkers {
            cancel,
            handles: vec![inbound_handle, flush_handle],
        };
        (handle, workers)
    }
}

struct InboundCtx {
    dedup: DedupGuard,
    buffer: DeviceBuffer,
    alerts: AlertEngine,
    flush_tx: mpsc::Sender<FlushUnit>,
    stats: Arc<PipelineStats>,
}

async fn run_inbound_pool(
    mut rx: mpsc::Receiver<InboundReading>,
    ctx: Arc<InboundCtx>,
    concurrency: usize,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => {
                let Some(job) = job else { break };
                ctx.stats.inbound_queue_depth.fetch_sub(1, Ordering::Relaxed);
                let Ok(permit) = semaphore.clone().acquire_owned().await else { break };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    process_inbound(&ctx, job).await;
                });
            }
        }
    }
    drain_in_flight(&semaphore, concurrency).await;
}

async fn run_flush_pool(
    mut rx: mpsc::Receiver<FlushUnit>,
    processor: Arc<FlushProcessor>,
    stats: Arc<PipelineStats>,
    concurrency: usize,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            unit = rx.recv() => {
                let Some(unit) = unit else { break };
                stats.flush_queue_depth.fetch_sub(1, Ordering::Relaxed);
                let Ok(permit) = semaphore.clone().acquire_owned().await else { break };
                let processor = processor.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    run_flush(&processor, unit).await;
                });
            }
        }
    }
    drain_in_flight(&semaphore, concurrency).await;
}

// Every spawned job holds one permit, so owning all of them means the pool
// is idle.
async fn drain_in_flight(semaphore: &Arc<Semaphore>, concurrency: usize) {
    let _ = semaphore.acquire_many(concurrency as u32).await;
}

async fn process_inbound(ctx: &InboundCtx, job: InboundReading) {
    let Some(model) = ModelKind::from_route(&job.route) else {
        ctx.stats.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(device = %job.device_id, route = %job.route, "dropping payload with unrecognized route");
        return;
    };
    if job.payload.is_empty() {
        ctx.stats.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(device = %job.device_id, "dropping empty payload");
        return;
    }

    let received_at = Utc::now();
    let mut payload = job.payload;
    let Some(reading) = map_payload(model, &job.device_id, &mut payload, received_at) else {
        ctx.stats.dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };

    if !ctx.dedup.try_admit(&reading.device_id, reading.captured_at).await {
        ctx.stats.duplicates.fetch_add(1, Ordering::Relaxed);
        return;
    }

    if let Err(err) = ctx.buffer.append(&reading, &job.meta).await {
        ctx.stats.record_error(err.to_string());
        tracing::warn!(error = %err, device = %reading.device_id, "failed to buffer reading");
        return;
    }
    ctx.stats.admitted.fetch_add(1, Ordering::Relaxed);

    ctx.alerts.evaluate(&reading).await;

    let unit = FlushUnit {
        device_id: reading.device_id,
        model,
    };
    ctx.stats.flush_queue_depth.fetch_add(1, Ordering::Relaxed);
    if ctx.flush_tx.send(unit).await.is_err() {
        ctx.stats.flush_queue_depth.fetch_sub(1, Ordering::Relaxed);
        tracing::warn!("flush queue closed; reading stays buffered for the next trigger");
    }
}

async fn run_flush(processor: &FlushProcessor, unit: FlushUnit) {
    match processor.flush(&unit).await {
        FlushOutcome::Flushed(rows) => {
            tracing::debug!(device = %unit.device_id, rows, "flush completed");
        }
        FlushOutcome::Pending(rows) => {
            tracing::trace!(device = %unit.device_id, rows, "batch below flush threshold");
        }
        FlushOutcome::Empty | FlushOutcome::Locked => {}
        FlushOutcome::Failed(reason) => {
            // Not re-enqueued: the next naturally arriving reading retries.
            tracing::warn!(device = %unit.device_id, reason = %reason, "flush failed");
        }
    }
}
