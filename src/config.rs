use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_pool_size: u32,
    pub batch_threshold: usize,
    pub dedup_ttl_secs: u64,
    pub flush_lock_ttl_secs: u64,
    pub inbound_workers: usize,
    pub flush_workers: usize,
    pub inbound_queue: usize,
    pub flush_queue: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let database_url = env::var("PIPELINE_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("PIPELINE_DATABASE_URL or DATABASE_URL is required")?;

        let db_pool_size = env::var("PIPELINE_DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(10);

        let batch_threshold = env::var("PIPELINE_BATCH_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(1);
        let dedup_ttl_secs = env::var("PIPELINE_DEDUP_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(300);
        let flush_lock_ttl_secs = env::var("PIPELINE_FLUSH_LOCK_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(60);

        let inbound_workers = env::var("PIPELINE_INBOUND_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(50);
        let flush_workers = env::var("PIPELINE_FLUSH_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(8);
        let inbound_queue = env::var("PIPELINE_INBOUND_QUEUE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(inbound_workers.saturating_mul(16));
        let flush_queue = env::var("PIPELINE_FLUSH_QUEUE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(flush_workers.saturating_mul(64));

        Ok(Self {
            database_url,
            db_pool_size,
            batch_threshold,
            dedup_ttl_secs,
            flush_lock_ttl_secs,
            inbound_workers,
            flush_workers,
            inbound_queue,
            flush_queue,
        })
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn flush_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.flush_lock_ttl_secs)
    }
}
