use crate::alerts::{AlertChannel, RuleOperator, RuleStore, RuleStoreError, ThresholdRule};
use crate::config::Config;
use crate::kv::{KvError, KvStore, MemoryKv};
use crate::notify::{Notifier, NotifyError};
use crate::reading::{FieldValue, ModelKind, Reading};
use crate::store::{BulkInsertReport, ReadingStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        db_pool_size: 1,
        batch_threshold: 1,
        dedup_ttl_secs: 300,
        flush_lock_ttl_secs: 60,
        inbound_workers: 4,
        flush_workers: 2,
        inbound_queue: 64,
        flush_queue: 64,
    }
}

pub fn reading_at(device_id: &str, received_at: DateTime<Utc>, pm2_5: f64) -> Reading {
    let mut fields = BTreeMap::new();
    fields.insert("pm2_5".to_string(), FieldValue::Number(pm2_5));
    Reading {
        device_id: device_id.to_string(),
        model: ModelKind::AirQuality,
        captured_at: received_at,
        received_at,
        fields,
        flushed: false,
    }
}

pub fn gt_rule(device_id: &str, datapoint: &str, max: f64, cooldown_minutes: i64) -> ThresholdRule {
    ThresholdRule {
        id: Uuid::new_v4(),
        device_id: device_id.to_string(),
        datapoint: datapoint.to_string(),
        operator: RuleOperator::Gt,
        min: None,
        max: Some(max),
        cooldown_minutes,
        channels: vec![
            AlertChannel::Sms {
                destination: "+15550100".to_string(),
            },
            AlertChannel::Email {
                destination: "owner@example.com".to_string(),
            },
        ],
        last_triggered_at: None,
        enabled: true,
    }
}

/// A key-value store that can be flipped into an unreachable state.
pub struct FlakyKv {
    inner: MemoryKv,
    failing: AtomicBool,
}

impl FlakyKv {
    pub fn new() -> Self {
        Self {
            inner: MemoryKv::new(),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn check(&self) -> Result<(), KvError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(KvError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FlakyKv {
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        self.check()?;
        self.inner.create_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn hash_set(&self, container: &str, field: &str, value: String) -> Result<(), KvError> {
        self.check()?;
        self.inner.hash_set(container, field, value).await
    }

    async fn hash_get(&self, container: &str, field: &str) -> Result<Option<String>, KvError> {
        self.check()?;
        self.inner.hash_get(container, field).await
    }

    async fn hash_get_all(&self, container: &str) -> Result<Vec<(String, String)>, KvError> {
        self.check()?;
        self.inner.hash_get_all(container).await
    }
}

#[derive(Default)]
pub struct MemoryReadingStore {
    rows: Mutex<Vec<(ModelKind, Reading)>>,
    failing: AtomicBool,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn count(&self, device_id: &str) -> usize {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, reading)| reading.device_id == device_id)
            .count()
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn bulk_insert(
        &self,
        model: ModelKind,
        readings: &[Reading],
    ) -> Result<BulkInsertReport, StoreError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        let mut rows = self.rows.lock().unwrap();
        for reading in readings {
            rows.push((model, reading.clone()));
        }
        Ok(BulkInsertReport {
            inserted: readings.len(),
            skipped: 0,
        })
    }
}

/// Durable store whose inserts park until the test releases them, to hold a
/// flush open while something else happens.
pub struct GatedStore {
    pub inner: MemoryReadingStore,
    pub entered: Notify,
    release: Notify,
    gated: AtomicBool,
}

impl GatedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryReadingStore::new(),
            entered: Notify::new(),
            release: Notify::new(),
            gated: AtomicBool::new(true),
        }
    }

    pub fn open_gate(&self) {
        self.gated.store(false, Ordering::Relaxed);
        self.release.notify_waiters();
    }
}

#[async_trait]
impl ReadingStore for GatedStore {
    async fn bulk_insert(
        &self,
        model: ModelKind,
        readings: &[Reading],
    ) -> Result<BulkInsertReport, StoreError> {
        if self.gated.load(Ordering::Relaxed) {
            let released = self.release.notified();
            self.entered.notify_one();
            released.await;
        }
        self.inner.bulk_insert(model, readings).await
    }
}

#[derive(Default)]
pub struct MemoryRuleStore {
    rules: Mutex<Vec<ThresholdRule>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, rule: ThresholdRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn set_last_triggered(&self, rule_id: Uuid, at: Option<DateTime<Utc>>) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules.iter_mut().find(|rule| rule.id == rule_id) {
            rule.last_triggered_at = at;
        }
    }

    pub fn last_triggered(&self, rule_id: Uuid) -> Option<DateTime<Utc>> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|rule| rule.id == rule_id)
            .and_then(|rule| rule.last_triggered_at)
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn enabled_for_device(&self, device_id: &str) -> Result<Vec<ThresholdRule>, RuleStoreError> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|rule| rule.enabled && rule.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn claim_trigger(
        &self,
        rule_id: Uuid,
        observed: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, RuleStoreError> {
        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules
            .iter_mut()
            .find(|rule| rule.id == rule_id && rule.enabled)
        else {
            return Ok(false);
        };
        if rule.last_triggered_at != observed {
            return Ok(false);
        }
        rule.last_triggered_at = Some(now);
        Ok(true)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sms: Mutex<Vec<(String, String)>>,
    pub emails: Mutex<Vec<(String, String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sms_count(&self) -> usize {
        self.sms.lock().unwrap().len()
    }

    pub fn email_count(&self) -> usize {
        self.emails.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_sms(&self, destination: &str, text: &str) -> Result<(), NotifyError> {
        self.sms
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_email(
        &self,
        destination: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotifyError> {
        self.emails.lock().unwrap().push((
            destination.to_string(),
            subject.to_string(),
            html_body.to_string(),
        ));
        Ok(())
    }
}
