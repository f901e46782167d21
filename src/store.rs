use crate::reading::{ModelKind, Reading};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json as SqlJson;
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("durable store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkInsertReport {
    pub inserted: usize,
    pub skipped: usize,
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persists one batch in a single unordered insert: rows that collide
    /// with already-persisted readings are skipped without aborting the
    /// batch. Per-row skips are reported, not retried.
    async fn bulk_insert(
        &self,
        model: ModelKind,
        readings: &[Reading],
    ) -> Result<BulkInsertReport, StoreError>;
}

pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn bulk_insert(
        &self,
        model: ModelKind,
        readings: &[Reading],
    ) -> Result<BulkInsertReport, StoreError> {
        if readings.is_empty() {
            return Ok(BulkInsertReport::default());
        }

        let inserted_at = Utc::now();
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} (device_id, captured_at, received_at, fields, inserted_at) ",
            model.table()
        ));
        builder.push_values(readings.iter(), |mut b, reading| {
            b.push_bind(&reading.device_id)
                .push_bind(reading.captured_at)
                .push_bind(reading.received_at)
                .push_bind(SqlJson(&reading.fields))
                .push_bind(inserted_at);
        });
        builder.push(" ON CONFLICT DO NOTHING");

        let result = builder.build().execute(&self.pool).await?;
        let inserted = result.rows_affected() as usize;
        let skipped = readings.len().saturating_sub(inserted);
        if skipped > 0 {
            tracing::warn!(
                model = %model.as_str(),
                inserted,
                skipped,
                "skipped rows during bulk insert"
            );
        }
        Ok(BulkInsertReport { inserted, skipped })
    }
}
