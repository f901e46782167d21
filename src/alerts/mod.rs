mod rules;
pub mod types;

pub use rules::{PgRuleStore, RuleStore, RuleStoreError};
pub use types::{validate_rule, AlertChannel, RuleOperator, ThresholdRule};

use crate::notify::Notifier;
use crate::reading::{FieldValue, Reading};
use crate::stats::PipelineStats;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub struct AlertEngine {
    rules: Arc<dyn RuleStore>,
    notifier: Arc<dyn Notifier>,
    stats: Arc<PipelineStats>,
}

impl AlertEngine {
    pub fn new(rules: Arc<dyn RuleStore>, notifier: Arc<dyn Notifier>, stats: Arc<PipelineStats>) -> Self {
        Self {
            rules,
            notifier,
            stats,
        }
    }

    /// Evaluates one reading against the device's rules. Runs inline on the
    /// inbound worker; delivery is handed off, and every failure here logs
    /// and returns rather than disturbing ingestion.
    pub async fn evaluate(&self, reading: &Reading) {
        let rules = match self.rules.enabled_for_device(&reading.device_id).await {
            Ok(rules) => rules,
            Err(err) => {
                tracing::warn!(error = %err, device = %reading.device_id, "failed to load alert rules");
                return;
            }
        };
        if rules.is_empty() {
            return;
        }

        let now = Utc::now();
        // Rules on the same datapoint evaluate independently, each gated by
        // its own cooldown.
        for rule in rules {
            if let Err(reason) = validate_rule(&rule) {
                tracing::warn!(rule = %rule.id, reason = %reason, "skipping invalid alert rule");
                continue;
            }
            let Some(value) = reading
                .fields
                .get(&rule.datapoint)
                .and_then(FieldValue::as_number)
            else {
                continue;
            };
            if !rule.operator.breaches(value, rule.min, rule.max) {
                continue;
            }
            if rule.in_cooldown(now) {
                tracing::debug!(rule = %rule.id, device = %reading.device_id, "alert suppressed by cooldown");
                continue;
            }

            match self
                .rules
                .claim_trigger(rule.id, rule.last_triggered_at, now)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(rule = %rule.id, "trigger claimed by concurrent evaluation");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(error = %err, rule = %rule.id, "failed to claim alert trigger");
                    continue;
                }
            }

            self.stats.alerts_fired.fetch_add(1, Ordering::Relaxed);
            self.dispatch(&rule, reading, value);
        }
    }

    fn dispatch(&self, rule: &ThresholdRule, reading: &Reading, value: f64) {
        let text = sms_text(rule, reading, value);
        let (subject, html_body) = email_parts(rule, reading, value);

        for channel in &rule.channels {
            match channel {
                AlertChannel::Sms { destination } => {
                    let notifier = self.notifier.clone();
                    let destination = destination.clone();
                    let text = text.clone();
                    tokio::spawn(async move {
                        if let Err(err) = notifier.send_sms(&destination, &text).await {
                            tracing::warn!(error = %err, "sms alert dispatch failed");
                        }
                    });
                }
                AlertChannel::Email { destination } => {
                    let notifier = self.notifier.clone();
                    let destination = destination.clone();
                    let subject = subject.clone();
                    let html_body = html_body.clone();
                    tokio::spawn(async move {
                        if let Err(err) = notifier.send_email(&destination, &subject, &html_body).await {
                            tracing::warn!(error = %err, "email alert dispatch failed");
                        }
                    });
                }
            }
        }
    }
}

fn describe_condition(rule: &ThresholdRule) -> String {
    match rule.operator {
        RuleOperator::Gt => format!("> {}", rule.max.unwrap_or_default()),
        RuleOperator::Gte => format!(">= {}", rule.max.unwrap_or_default()),
        RuleOperator::Lt => format!("< {}", rule.min.unwrap_or_default()),
        RuleOperator::Lte => format!("<= {}", rule.min.unwrap_or_default()),
        RuleOperator::Between => format!(
            "between {} and {}",
            rule.min.unwrap_or_default(),
            rule.max.unwrap_or_default()
        ),
        RuleOperator::Outside => format!(
            "outside {} to {}",
            rule.min.unwrap_or_default(),
            rule.max.unwrap_or_default()
        ),
    }
}

fn sms_text(rule: &ThresholdRule, reading: &Reading, value: f64) -> String {
    format!(
        "Alert: {} on {} is {} ({})",
        rule.datapoint,
        reading.device_id,
        value,
        describe_condition(rule)
    )
}

fn email_parts(rule: &ThresholdRule, reading: &Reading, value: f64) -> (String, String) {
    let subject = format!("Sensor alert: {} on {}", rule.datapoint, reading.device_id);
    let html_body = format!(
        "<p>Device <strong>{}</strong> reported <strong>{} = {}</strong> at {}, matching the alert condition ({}).</p>",
        reading.device_id,
        rule.datapoint,
        value,
        reading.captured_at.to_rfc3339(),
        describe_condition(rule)
    );
    (subject, html_body)
}
