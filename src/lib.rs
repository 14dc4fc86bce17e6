//! Telemetry intake: obfuscation codec, admission limiting, schema checks and
//! enrichment in front of a document store.

pub mod codec;
pub mod config;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod rate_limiter;
pub mod schema;
pub mod server;
pub mod storage;
