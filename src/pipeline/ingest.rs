//! Ingestion state machine.
//!
//! Received -> AdmissionChecked -> BodyResolved -> Parsed -> Validated ->
//! Enriched -> Persisted -> Acknowledged. The first failing step ends the
//! request; nothing is retried.

use axum::http::StatusCode;
use chrono::Utc;
use serde_json::{json, Value};
use std::string::FromUtf8Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::codec::{self, CodecError};
use crate::constants::{
    DEFAULT_COLLECTION, ERR_CANNOT_DECODE, ERR_INVALID_JSON, ERR_INVALID_PAYLOAD,
    ERR_INVALID_SCHEMA, ERR_RATE_LIMITED, ERR_SERVER,
};
use crate::envelope::TelemetryEnvelope;
use crate::observability::metrics;
use crate::pipeline::enrich::enrich;
use crate::rate_limiter::AdmissionLimiter;
use crate::schema::{SchemaValidator, Violation};
use crate::storage::{DocumentStore, StoreError};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("rate limit exceeded")]
    RateLimited,

    #[error("cannot decode payload: {0}")]
    DecodeFailure(#[from] CodecError),

    #[error("decoded payload is not valid JSON: {0}")]
    ParseFailure(#[source] serde_json::Error),

    /// A body sent as JSON that does not parse. Answered as `invalid_payload`
    /// since no decode step was involved.
    #[error("JSON body does not parse: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("payload is not a JSON object")]
    ShapeFailure,

    #[error("payload failed schema validation with {} violation(s)", .0.len())]
    SchemaViolation(Vec<Violation>),

    #[error("store write failed: {0}")]
    StoreFailure(#[from] StoreError),

    #[error("internal fault: {0}")]
    InternalFault(String),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            IngestError::DecodeFailure(_)
            | IngestError::ParseFailure(_)
            | IngestError::MalformedBody(_)
            | IngestError::ShapeFailure
            | IngestError::SchemaViolation(_) => StatusCode::BAD_REQUEST,
            IngestError::StoreFailure(_) | IngestError::InternalFault(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code returned in the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::RateLimited => ERR_RATE_LIMITED,
            IngestError::DecodeFailure(_) => ERR_CANNOT_DECODE,
            IngestError::ParseFailure(_) => ERR_INVALID_JSON,
            IngestError::MalformedBody(_) | IngestError::ShapeFailure => ERR_INVALID_PAYLOAD,
            IngestError::SchemaViolation(_) => ERR_INVALID_SCHEMA,
            IngestError::StoreFailure(_) | IngestError::InternalFault(_) => ERR_SERVER,
        }
    }

    pub fn is_server_fault(&self) -> bool {
        self.status().is_server_error()
    }

    /// Caller-facing body. Server faults never carry detail.
    pub fn body(&self) -> Value {
        match self {
            IngestError::SchemaViolation(violations) => {
                json!({ "error": self.code(), "details": violations })
            }
            _ => json!({ "error": self.code() }),
        }
    }
}

/// Request body as handed over by the HTTP layer.
#[derive(Debug)]
pub enum IngestBody {
    /// Body already parsed as JSON.
    Json(Value),
    /// Opaque text token to run through the codec.
    Text(String),
    /// Declared as JSON but failed to parse.
    MalformedJson(serde_json::Error),
    /// Text body that is not UTF-8.
    NonUtf8(FromUtf8Error),
}

impl IngestBody {
    /// Classify a raw body by content type. A JSON string literal is a token, not a payload.
    pub fn from_http(content_type: Option<&str>, bytes: Vec<u8>) -> Self {
        let is_json = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|mime| {
                let mime = mime.trim().to_ascii_lowercase();
                mime == "application/json" || mime.ends_with("+json")
            })
            .unwrap_or(false);

        if is_json {
            return match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::String(token)) => IngestBody::Text(token),
                Ok(value) => IngestBody::Json(value),
                Err(e) => IngestBody::MalformedJson(e),
            };
        }
        match String::from_utf8(bytes) {
            Ok(text) => IngestBody::Text(text),
            Err(e) => IngestBody::NonUtf8(e),
        }
    }
}

#[derive(Debug)]
pub struct IngestRequest {
    pub body: IngestBody,
    /// Caller-supplied `v` token: the codec key and the stored `clientV`.
    pub version: Option<String>,
    /// Resolved source identity (see [`crate::rate_limiter::source_identity`]).
    pub source: String,
}

pub struct IngestionPipeline {
    limiter: Arc<AdmissionLimiter>,
    validator: Arc<SchemaValidator>,
    store: Option<Arc<dyn DocumentStore>>,
    collection: String,
    store_timeout: Option<Duration>,
}

impl IngestionPipeline {
    pub fn new(
        limiter: Arc<AdmissionLimiter>,
        validator: Arc<SchemaValidator>,
        store: Option<Arc<dyn DocumentStore>>,
    ) -> Self {
        Self {
            limiter,
            validator,
            store,
            collection: DEFAULT_COLLECTION.to_string(),
            store_timeout: None,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_store_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn limiter(&self) -> &Arc<AdmissionLimiter> {
        &self.limiter
    }

    /// Run one request through the pipeline, recording the outcome.
    pub async fn ingest(&self, request: IngestRequest) -> Result<(), IngestError> {
        let source = request.source.clone();
        let result = self.run(request).await;
        match &result {
            Ok(()) => metrics::envelope_accepted(),
            Err(e) => {
                metrics::envelope_rejected(e.code());
                if e.is_server_fault() {
                    error!(source = %source, error = %e, "Ingestion failed");
                } else {
                    debug!(source = %source, code = e.code(), error = %e, "Envelope rejected");
                }
            }
        }
        result
    }

    async fn run(&self, request: IngestRequest) -> Result<(), IngestError> {
        let received_at = Utc::now().timestamp_millis();
        let version = request.version.as_deref().filter(|v| !v.is_empty());

        if !self.limiter.allow(&request.source) {
            return Err(IngestError::RateLimited);
        }

        let payload = resolve_body(request.body, version)?;
        if !payload.is_object() {
            return Err(IngestError::ShapeFailure);
        }

        let envelope = self
            .validator
            .check(payload)
            .map_err(IngestError::SchemaViolation)?;
        let envelope = enrich(envelope, received_at, version, &request.source);

        self.persist(&envelope).await
    }

    async fn persist(&self, envelope: &TelemetryEnvelope) -> Result<(), IngestError> {
        let Some(store) = &self.store else {
            warn!("No store configured - telemetry dropped (dev mode)");
            metrics::envelope_dropped();
            return Ok(());
        };

        let document = envelope
            .to_document()
            .map_err(|e| IngestError::InternalFault(e.to_string()))?;

        let started = Instant::now();
        let write = store.insert(&self.collection, document);
        let outcome = match self.store_timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(limit.as_millis() as u64)),
            },
            None => write.await,
        };
        metrics::store_write_duration(started.elapsed().as_secs_f64());

        outcome.map_err(|e| {
            metrics::store_write_error();
            error!(store = store.name(), collection = %self.collection, error = %e, "Store write failed");
            IngestError::StoreFailure(e)
        })
    }
}

/// Turn the body into a JSON value, decoding text tokens with the caller's key.
fn resolve_body(body: IngestBody, key: Option<&str>) -> Result<Value, IngestError> {
    match body {
        IngestBody::Json(value) => Ok(value),
        IngestBody::Text(token) => {
            let decoded = codec::decode(&token, key)?;
            serde_json::from_str(&decoded).map_err(IngestError::ParseFailure)
        }
        IngestBody::MalformedJson(e) => Err(IngestError::MalformedBody(e)),
        IngestBody::NonUtf8(e) => Err(IngestError::DecodeFailure(CodecError::InvalidUtf8(e))),
    }
}
