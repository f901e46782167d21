pub mod alerts;
pub mod buffer;
pub mod config;
pub mod dedup;
pub mod flush;
pub mod kv;
pub mod lock;
pub mod notify;
pub mod queue;
pub mod reading;
pub mod stats;
pub mod store;

#[cfg(test)]
mod test_support;

pub use alerts::AlertEngine;
pub use buffer::DeviceBuffer;
pub use config::Config;
pub use dedup::DedupGuard;
pub use flush::{FlushOutcome, FlushProcessor, FlushUnit};
pub use kv::{KvStore, MemoryKv};
pub use lock::{FlushCoordinator, FlushLockGuard};
pub use notify::{LogNotifier, Notifier};
pub use queue::{InboundReading, Pipeline, PipelineHandle, PipelineWorkers};
pub use reading::{DeviceMeta, FieldValue, ModelKind, Reading};
pub use stats::PipelineStats;
pub use store::{BulkInsertReport, PgReadingStore, ReadingStore};
