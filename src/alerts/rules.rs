use super::types::{AlertChannel, RuleOperator, ThresholdRule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json as SqlJson;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RuleStoreError {
    #[error("rule store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn enabled_for_device(&self, device_id: &str) -> Result<Vec<ThresholdRule>, RuleStoreError>;

    /// Advances `last_triggered_at` from the value this evaluation observed.
    /// Returns `false` when a concurrent evaluation claimed the trigger
    /// first, so at most one alert fires per cooldown window.
    async fn claim_trigger(
        &self,
        rule_id: Uuid,
        observed: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, RuleStoreError>;
}

pub struct PgRuleStore {
    pool: PgPool,
}

impl PgRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct RuleRow {
    id: Uuid,
    device_id: String,
    datapoint: String,
    operator: String,
    min: Option<f64>,
    max: Option<f64>,
    cooldown_minutes: i64,
    channels: SqlJson<Vec<AlertChannel>>,
    last_triggered_at: Option<DateTime<Utc>>,
    enabled: bool,
}

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn enabled_for_device(&self, device_id: &str) -> Result<Vec<ThresholdRule>, RuleStoreError> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            r#"
            SELECT
                id,
                device_id,
                datapoint,
                operator,
                min,
                max,
                cooldown_minutes,
                channels,
                last_triggered_at,
                enabled
            FROM alert_rules
            WHERE device_id = $1
              AND enabled = TRUE
            ORDER BY id ASC
            "#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(operator) = RuleOperator::parse(&row.operator) else {
                tracing::warn!(rule = %row.id, operator = %row.operator, "skipping rule with unknown operator");
                continue;
            };
            rules.push(ThresholdRule {
                id: row.id,
                device_id: row.device_id,
                datapoint: row.datapoint,
                operator,
                min: row.min,
                max: row.max,
                cooldown_minutes: row.cooldown_minutes,
                channels: row.channels.0,
                last_triggered_at: row.last_triggered_at,
                enabled: row.enabled,
            });
        }
        Ok(rules)
    }

    async fn claim_trigger(
        &self,
        rule_id: Uuid,
        observed: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, RuleStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE alert_rules
            SET last_triggered_at = $2
            WHERE id = $1
              AND enabled = TRUE
              AND last_triggered_at IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(rule_id)
        .bind(now)
        .bind(observed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
