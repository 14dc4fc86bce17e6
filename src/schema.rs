//! Structural contract for inbound telemetry envelopes.
//!
//! Validation runs the JSON Schema in `schemas/telemetry.v1.json`, compiled
//! once at startup. Sanitizing then lifts the validated value into the typed
//! [`TelemetryEnvelope`], which drops properties the schema does not name.

use jsonschema::error::ValidationErrorKind;
use jsonschema::{JSONSchema, ValidationError};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::envelope::TelemetryEnvelope;

pub const TELEMETRY_SCHEMA_V1: &str = include_str!("../schemas/telemetry.v1.json");

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("schema document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("schema failed to compile: {0}")]
    Compile(String),
}

/// A single field-level problem reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// JSON pointer to the offending (or missing) field, e.g. `/env/userAgent`.
    pub path: String,
    pub rule: String,
    pub message: String,
}

impl Violation {
    fn from_error(error: &ValidationError<'_>) -> Self {
        let at = error.instance_path.to_string();
        let (path, rule) = match &error.kind {
            ValidationErrorKind::Required { property } => {
                let name = property
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| property.to_string());
                (format!("{at}/{name}"), "required")
            }
            ValidationErrorKind::Type { .. } => (at, "type"),
            _ => (at, "constraint"),
        };
        Self {
            path,
            rule: rule.to_string(),
            message: error.to_string(),
        }
    }
}

pub struct SchemaValidator {
    compiled: JSONSchema,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

impl SchemaValidator {
    /// Compile the bundled v1 telemetry schema.
    pub fn telemetry_v1() -> Result<Self, SchemaError> {
        Self::from_source(TELEMETRY_SCHEMA_V1)
    }

    pub fn from_source(source: &str) -> Result<Self, SchemaError> {
        let document: Value = serde_json::from_str(source)?;
        // jsonschema 0.17 ties compile errors to the schema lifetime; the
        // validator lives for the whole process, so leak the document once.
        let document: &'static Value = Box::leak(Box::new(document));
        let compiled = JSONSchema::options()
            .compile(document)
            .map_err(|e| SchemaError::Compile(e.to_string()))?;
        Ok(Self { compiled })
    }

    /// Check `instance` against the schema, collecting every violation in order.
    pub fn validate(&self, instance: &Value) -> Result<(), Vec<Violation>> {
        match self.compiled.validate(instance) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors.map(|e| Violation::from_error(&e)).collect()),
        }
    }

    /// Validate, then sanitize into the typed envelope.
    pub fn check(&self, instance: Value) -> Result<TelemetryEnvelope, Vec<Violation>> {
        self.validate(&instance)?;
        sanitize(instance)
    }
}

/// Lift an already-validated value into [`TelemetryEnvelope`], pruning unknown properties.
///
/// Only fails when the value slips past the schema but cannot be represented
/// by the typed record (e.g. an integer outside the `i64` range).
pub fn sanitize(instance: Value) -> Result<TelemetryEnvelope, Vec<Violation>> {
    serde_json::from_value(instance).map_err(|e| {
        vec![Violation {
            path: String::new(),
            rule: "type".to_string(),
            message: e.to_string(),
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> SchemaValidator {
        SchemaValidator::telemetry_v1().unwrap()
    }

    fn paths(violations: &[Violation]) -> Vec<&str> {
        violations.iter().map(|v| v.path.as_str()).collect()
    }

    #[test]
    fn minimal_envelope_is_valid() {
        let v = json!({"timestamp": 1_700_000_000_000_i64, "env": {"userAgent": "test-agent"}});
        assert!(validator().validate(&v).is_ok());
    }

    #[test]
    fn full_envelope_with_nulls_is_valid() {
        let v = json!({
            "id": "sess-1",
            "timestamp": 1_700_000_000_000_i64,
            "env": {
                "userAgent": "ua",
                "language": "en-US",
                "online": true,
                "downlink": null,
                "effectiveType": null,
                "rtt": 50,
                "saveData": null,
                "type": null,
                "timezone": null,
                "locale": "en-US",
                "offsetMinutes": null,
                "href": "https://example.com/",
                "referrer": null
            },
            "trace": [{"event": "load", "timestamp": 1, "data": {"k": 1}, "extra": true}],
            "pings": [{"url": "https://a.example", "duration": 12.5, "site": null, "start": null}],
            "meta": {"anything": [1, 2, 3]}
        });
        assert!(validator().validate(&v).is_ok());
    }

    #[test]
    fn missing_timestamp_is_reported() {
        let v = json!({"env": {"userAgent": "ua"}});
        let violations = validator().validate(&v).unwrap_err();
        assert!(paths(&violations).contains(&"/timestamp"));
        assert_eq!(violations[0].rule, "required");
    }

    #[test]
    fn missing_user_agent_is_reported() {
        let v = json!({"timestamp": 1, "env": {"language": "en"}});
        let violations = validator().validate(&v).unwrap_err();
        assert!(paths(&violations).contains(&"/env/userAgent"));
    }

    #[test]
    fn wrong_types_are_reported_in_nested_items() {
        let v = json!({
            "timestamp": "soon",
            "env": {"userAgent": "ua", "online": "yes"},
            "pings": [{"url": "u"}]
        });
        let violations = validator().validate(&v).unwrap_err();
        let paths = paths(&violations);
        assert!(paths.contains(&"/timestamp"));
        assert!(paths.contains(&"/env/online"));
        assert!(paths.contains(&"/pings/0/duration"));
    }

    #[test]
    fn violations_do_not_echo_the_schema() {
        let v = json!({"timestamp": 1});
        let violations = validator().validate(&v).unwrap_err();
        for violation in violations {
            assert!(!violation.message.contains("properties"));
            assert!(!violation.message.contains("$schema"));
        }
    }

    #[test]
    fn check_prunes_unknown_properties() {
        let v = json!({
            "timestamp": 1,
            "env": {"userAgent": "x", "gpu": "fast"},
            "bogus": "y",
            "trace": [{"event": "e", "timestamp": 2, "extra": 1, "data": {"keep": "me"}}],
            "meta": {"free": "form"}
        });
        let envelope = validator().check(v).unwrap();
        let doc = envelope.to_document().unwrap();
        assert!(doc.get("bogus").is_none());
        assert!(doc["env"].get("gpu").is_none());
        assert!(doc["trace"][0].get("extra").is_none());
        assert_eq!(doc["trace"][0]["data"]["keep"], "me");
        assert_eq!(doc["meta"]["free"], "form");
    }

    #[test]
    fn integral_float_timestamp_passes_both_steps() {
        let v = json!({"timestamp": 1.0, "env": {"userAgent": "x", "offsetMinutes": 120.0}});
        let envelope = validator().check(v).unwrap();
        assert_eq!(envelope.timestamp, 1);
        assert_eq!(envelope.to_document().unwrap()["timestamp"], 1);
    }
}
