use std::sync::atomic::AtomicU64;
use std::sync::Mutex;

#[derive(Debug)]
pub struct PipelineStats {
    pub admitted: AtomicU64,
    pub duplicates: AtomicU64,
    pub dropped: AtomicU64,
    pub inbound_queue_depth: AtomicU64,
    pub flush_queue_depth: AtomicU64,
    pub flushed_rows: AtomicU64,
    pub last_flush_unix_ms: AtomicU64,
    pub alerts_fired: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            admitted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            inbound_queue_depth: AtomicU64::new(0),
            flush_queue_depth: AtomicU64::new(0),
            flushed_rows: AtomicU64::new(0),
            last_flush_unix_ms: AtomicU64::new(0),
            alerts_fired: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}
