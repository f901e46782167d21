use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    AirQuality,
    Climate,
    Power,
}

impl ModelKind {
    pub fn from_route(route: &str) -> Option<Self> {
        match route.trim() {
            "air_quality" | "air-quality" => Some(Self::AirQuality),
            "climate" => Some(Self::Climate),
            "power" => Some(Self::Power),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AirQuality => "air_quality",
            Self::Climate => "climate",
            Self::Power => "power",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::AirQuality => "readings_air_quality",
            Self::Climate => "readings_climate",
            Self::Power => "readings_power",
        }
    }

    fn known_fields(&self) -> &'static [&'static str] {
        match self {
            Self::AirQuality => &["pm1_0", "pm2_5", "pm10", "co2", "voc", "temperature", "humidity"],
            Self::Climate => &["temperature", "humidity", "pressure", "dew_point"],
            Self::Power => &["voltage", "current", "power", "energy_wh", "frequency"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: String,
    pub model: ModelKind,
    pub captured_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
    pub flushed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMeta {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
}

/// Maps one raw payload into a Canonical Reading. `None` means the payload is
/// not telemetry for this model and the caller drops it without error.
pub fn map_payload(
    model: ModelKind,
    device_id: &str,
    payload: &mut [u8],
    received_at: DateTime<Utc>,
) -> Option<Reading> {
    if payload.is_empty() {
        return None;
    }
    let raw: JsonValue = match simd_json::serde::from_slice(payload) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(device = %device_id, error = %err, "unparseable telemetry payload");
            return None;
        }
    };
    let raw = raw.as_object()?;

    let captured_at = raw
        .get("captured_at")
        .or_else(|| raw.get("timestamp"))
        .or_else(|| raw.get("ts"))
        .and_then(parse_timestamp)
        .unwrap_or(received_at);

    let mut fields: BTreeMap<String, FieldValue> = BTreeMap::new();
    for key in model.known_fields() {
        match raw.get(*key) {
            Some(JsonValue::Number(number)) => {
                if let Some(value) = number.as_f64().filter(|v| v.is_finite()) {
                    fields.insert((*key).to_string(), FieldValue::Number(value));
                }
            }
            Some(JsonValue::String(text)) => {
                // Some firmware revisions send numerics as strings.
                if let Ok(value) = text.trim().parse::<f64>() {
                    if value.is_finite() {
                        fields.insert((*key).to_string(), FieldValue::Number(value));
                    }
                } else {
                    fields.insert((*key).to_string(), FieldValue::Text(text.clone()));
                }
            }
            _ => {}
        }
    }

    if fields.is_empty() {
        tracing::debug!(device = %device_id, model = %model.as_str(), "payload carries no recognized datapoints");
        return None;
    }

    Some(Reading {
        device_id: device_id.to_string(),
        model,
        captured_at,
        received_at,
        fields,
        flushed: false,
    })
}

fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(text) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        JsonValue::Number(number) => {
            if let Some(ms) = number.as_i64() {
                millis_to_dt(ms)
            } else {
                number.as_f64().and_then(|ts| millis_to_dt((ts * 1000.0) as i64))
            }
        }
        _ => None,
    }
}

fn millis_to_dt(ms: i64) -> Option<DateTime<Utc>> {
    let secs = ms / 1000;
    let nanos = ((ms % 1000) * 1_000_000) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}
