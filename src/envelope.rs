use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

/// Keeps "absent" and "explicit null" apart for nullable fields:
/// absent -> `None`, `null` -> `Some(None)`, value -> `Some(Some(v))`.
fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

type Nullable<T> = Option<Option<T>>;

/// Accepts integral floats such as `1.0` or `1e3`, which JSON Schema treats as integers.
fn integral_from_number<E: serde::de::Error>(n: Number) -> Result<i64, E> {
    if let Some(i) = n.as_i64() {
        return Ok(i);
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => Ok(f as i64),
        _ => Err(E::custom(format!("{n} is not an integer in the supported range"))),
    }
}

fn integral<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    integral_from_number(Number::deserialize(deserializer)?)
}

fn nullable_integral<'de, D>(deserializer: D) -> Result<Nullable<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Number>::deserialize(deserializer)? {
        Some(n) => integral_from_number(n).map(|i| Some(Some(i))),
        None => Ok(Some(None)),
    }
}

/// One telemetry submission as it is persisted.
///
/// Deserializing into this type is the sanitize step: properties it does not
/// name are dropped, except inside `meta` and `trace[].data`, which stay free-form.
/// `receivedAt` and `clientV` are never taken from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(deserialize_with = "integral")]
    pub timestamp: i64,
    pub env: ClientEnv,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<TraceEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pings: Option<Vec<PingResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    #[serde(skip_deserializing)]
    pub received_at: Option<i64>,
    #[serde(skip_deserializing)]
    pub client_v: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEnv {
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub downlink: Nullable<Number>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub effective_type: Nullable<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub rtt: Nullable<Number>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub save_data: Nullable<bool>,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_type: Nullable<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub timezone: Nullable<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub locale: Nullable<String>,
    #[serde(
        default,
        deserialize_with = "nullable_integral",
        skip_serializing_if = "Option::is_none"
    )]
    pub offset_minutes: Nullable<i64>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub href: Nullable<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub referrer: Nullable<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub event: String,
    #[serde(deserialize_with = "integral")]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub site: Nullable<String>,
    pub url: String,
    #[serde(
        default,
        deserialize_with = "nullable_integral",
        skip_serializing_if = "Option::is_none"
    )]
    pub start: Nullable<i64>,
    pub duration: Number,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
}

impl TelemetryEnvelope {
    /// The document handed to the store. Server fields are always present,
    /// `clientV` as `null` when the caller sent no version token.
    pub fn to_document(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nullable_fields_keep_explicit_null() {
        let env: ClientEnv = serde_json::from_value(json!({
            "userAgent": "ua",
            "downlink": null,
            "timezone": "Europe/Oslo"
        }))
        .unwrap();
        assert_eq!(env.downlink, Some(None));
        assert_eq!(env.timezone, Some(Some("Europe/Oslo".to_string())));
        assert_eq!(env.rtt, None);

        let back = serde_json::to_value(&env).unwrap();
        assert_eq!(
            back,
            json!({"userAgent": "ua", "downlink": null, "timezone": "Europe/Oslo"})
        );
    }

    #[test]
    fn server_fields_are_not_read_from_client() {
        let envelope: TelemetryEnvelope = serde_json::from_value(json!({
            "timestamp": 1,
            "env": {"userAgent": "ua"},
            "receivedAt": 42,
            "clientV": "forged"
        }))
        .unwrap();
        assert_eq!(envelope.received_at, None);
        assert_eq!(envelope.client_v, None);
    }

    #[test]
    fn document_always_carries_server_fields() {
        let envelope: TelemetryEnvelope =
            serde_json::from_value(json!({"timestamp": 1, "env": {"userAgent": "ua"}})).unwrap();
        let doc = envelope.to_document().unwrap();
        assert_eq!(doc["receivedAt"], Value::Null);
        assert_eq!(doc["clientV"], Value::Null);
        assert!(doc.get("trace").is_none());
    }

    #[test]
    fn integral_floats_fill_integer_fields() {
        let envelope: TelemetryEnvelope = serde_json::from_value(json!({
            "timestamp": 1.0,
            "env": {"userAgent": "ua", "offsetMinutes": -60.0},
            "trace": [{"event": "load", "timestamp": 1e3}],
            "pings": [{"url": "u", "duration": 1, "start": 2.0}]
        }))
        .unwrap();
        assert_eq!(envelope.timestamp, 1);
        assert_eq!(envelope.env.offset_minutes, Some(Some(-60)));
        assert_eq!(envelope.trace.unwrap()[0].timestamp, 1000);
        assert_eq!(envelope.pings.unwrap()[0].start, Some(Some(2)));
    }

    #[test]
    fn fractional_or_huge_integers_are_refused() {
        for timestamp in [json!(1.5), json!(1e300), json!(u64::MAX)] {
            let result = serde_json::from_value::<TelemetryEnvelope>(
                json!({"timestamp": timestamp, "env": {"userAgent": "ua"}}),
            );
            assert!(result.is_err(), "{timestamp} should not fit an i64");
        }
    }

    #[test]
    fn numeric_metrics_keep_their_written_form() {
        let envelope: TelemetryEnvelope = serde_json::from_value(json!({
            "timestamp": 1,
            "env": {"userAgent": "ua", "downlink": 10, "rtt": 50},
            "pings": [{"url": "u", "duration": 5000}, {"url": "v", "duration": 38.5}]
        }))
        .unwrap();
        let doc = envelope.to_document().unwrap();
        assert_eq!(doc["env"]["downlink"].to_string(), "10");
        assert_eq!(doc["env"]["rtt"].to_string(), "50");
        assert_eq!(doc["pings"][0]["duration"].to_string(), "5000");
        assert_eq!(doc["pings"][1]["duration"].to_string(), "38.5");
    }
}
