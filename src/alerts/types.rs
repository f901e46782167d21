use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    Outside,
}

impl RuleOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Between => "between",
            Self::Outside => "outside",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "gt" | ">" => Some(Self::Gt),
            "gte" | ">=" => Some(Self::Gte),
            "lt" | "<" => Some(Self::Lt),
            "lte" | "<=" => Some(Self::Lte),
            "between" => Some(Self::Between),
            "outside" => Some(Self::Outside),
            _ => None,
        }
    }

    /// `Gt`/`Gte` breach above the `max` bound, `Lt`/`Lte` below the `min`
    /// bound; `Between` fires inside `[min, max]`, `Outside` outside it.
    pub fn breaches(self, value: f64, min: Option<f64>, max: Option<f64>) -> bool {
        match self {
            Self::Gt => max.is_some_and(|bound| value > bound),
            Self::Gte => max.is_some_and(|bound| value >= bound),
            Self::Lt => min.is_some_and(|bound| value < bound),
            Self::Lte => min.is_some_and(|bound| value <= bound),
            Self::Between => match (min, max) {
                (Some(low), Some(high)) => value >= low && value <= high,
                _ => false,
            },
            Self::Outside => match (min, max) {
                (Some(low), Some(high)) => value < low || value > high,
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertChannel {
    Sms { destination: String },
    Email { destination: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub id: Uuid,
    pub device_id: String,
    pub datapoint: String,
    pub operator: RuleOperator,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    pub cooldown_minutes: i64,
    #[serde(default)]
    pub channels: Vec<AlertChannel>,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl ThresholdRule {
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_triggered_at else {
            return false;
        };
        now < last + ChronoDuration::minutes(self.cooldown_minutes.max(0))
    }
}

pub fn validate_rule(rule: &ThresholdRule) -> Result<(), String> {
    if rule.datapoint.trim().is_empty() {
        return Err("rule requires a datapoint".to_string());
    }
    if rule.cooldown_minutes < 0 {
        return Err("cooldown_minutes must be >= 0".to_string());
    }

    let finite = |bound: Option<f64>| bound.is_some_and(f64::is_finite);
    match rule.operator {
        RuleOperator::Gt | RuleOperator::Gte => {
            if !finite(rule.max) {
                return Err("gt/gte requires a finite max bound".to_string());
            }
        }
        RuleOperator::Lt | RuleOperator::Lte => {
            if !finite(rule.min) {
                return Err("lt/lte requires a finite min bound".to_string());
            }
        }
        RuleOperator::Between | RuleOperator::Outside => {
            let (Some(low), Some(high)) = (rule.min, rule.max) else {
                return Err("between/outside requires min and max bounds".to_string());
            };
            if !low.is_finite() || !high.is_finite() {
                return Err("range bounds must be finite".to_string());
            }
            if low >= high {
                return Err("min must be < max".to_string());
            }
        }
    }

    for channel in &rule.channels {
        let destination = match channel {
            AlertChannel::Sms { destination } => destination,
            AlertChannel::Email { destination } => destination,
        };
        if destination.trim().is_empty() {
            return Err("channel requires a destination".to_string());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(operator: RuleOperator, min: Option<f64>, max: Option<f64>) -> ThresholdRule {
        ThresholdRule {
            id: Uuid::new_v4(),
            device_id: "d1".to_string(),
            datapoint: "pm2_5".to_string(),
            operator,
            min,
            max,
            cooldown_minutes: 5,
            channels: vec![AlertChannel::Sms {
                destination: "+15550100".to_string(),
            }],
            last_triggered_at: None,
            enabled: true,
        }
    }

    #[test]
    fn operator_breach_semantics() {
        assert!(RuleOperator::Gt.breaches(36.0, None, Some(35.0)));
        assert!(!RuleOperator::Gt.breaches(35.0, None, Some(35.0)));
        assert!(RuleOperator::Gte.breaches(35.0, None, Some(35.0)));
        assert!(RuleOperator::Lt.breaches(4.9, Some(5.0), None));
        assert!(!RuleOperator::Lt.breaches(5.0, Some(5.0), None));
        assert!(RuleOperator::Lte.breaches(5.0, Some(5.0), None));
        assert!(RuleOperator::Between.breaches(15.0, Some(10.0), Some(20.0)));
        assert!(!RuleOperator::Between.breaches(25.0, Some(10.0), Some(20.0)));
        assert!(RuleOperator::Outside.breaches(25.0, Some(10.0), Some(20.0)));
        assert!(!RuleOperator::Outside.breaches(15.0, Some(10.0), Some(20.0)));
        // Missing bounds never breach.
        assert!(!RuleOperator::Gt.breaches(100.0, Some(35.0), None));
        assert!(!RuleOperator::Between.breaches(15.0, Some(10.0), None));
    }

    #[test]
    fn validation_rejects_incomplete_rules() {
        assert!(validate_rule(&rule(RuleOperator::Gt, None, Some(35.0))).is_ok());
        assert!(validate_rule(&rule(RuleOperator::Gt, Some(35.0), None)).is_err());
        assert!(validate_rule(&rule(RuleOperator::Lt, None, Some(5.0))).is_err());
        assert!(validate_rule(&rule(RuleOperator::Between, Some(20.0), Some(10.0))).is_err());
        assert!(validate_rule(&rule(RuleOperator::Outside, Some(10.0), Some(f64::NAN))).is_err());

        let mut blank = rule(RuleOperator::Gt, None, Some(35.0));
        blank.datapoint = "  ".to_string();
        assert!(validate_rule(&blank).is_err());

        let mut negative = rule(RuleOperator::Gt, None, Some(35.0));
        negative.cooldown_minutes = -1;
        assert!(validate_rule(&negative).is_err());

        let mut no_destination = rule(RuleOperator::Gt, None, Some(35.0));
        no_destination.channels = vec![AlertChannel::Email {
            destination: String::new(),
        }];
        assert!(validate_rule(&no_destination).is_err());
    }

    #[test]
    fn cooldown_window() {
        let mut r = rule(RuleOperator::Gt, None, Some(35.0));
        let now = Utc::now();
        assert!(!r.in_cooldown(now));
        r.last_triggered_at = Some(now - ChronoDuration::minutes(2));
        assert!(r.in_cooldown(now));
        r.last_triggered_at = Some(now - ChronoDuration::minutes(6));
        assert!(!r.in_cooldown(now));
    }

    #[test]
    fn operator_parse_accepts_symbols() {
        assert_eq!(RuleOperator::parse(">"), Some(RuleOperator::Gt));
        assert_eq!(RuleOperator::parse("gte"), Some(RuleOperator::Gte));
        assert_eq!(RuleOperator::parse("between"), Some(RuleOperator::Between));
        assert_eq!(RuleOperator::parse("within"), None);
    }
}
