/// Shared constants so route paths, defaults and response codes stay consistent
/// across the server, pipeline and CLI.
use std::time::Duration;

// Routes
pub const METRICS_ROUTE: &str = "/api/metrics";
pub const HEALTH_ROUTE: &str = "/health";

// Query parameters
pub const VERSION_PARAM: &str = "v";
pub const CONFIG_PARAM: &str = "f";

// Defaults
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_RATE_LIMIT_MAX: u32 = 300;
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_SERVER_KEY: &str = "calypso";
pub const DEFAULT_COLLECTION: &str = "telemetry";
pub const DEFAULT_STORE_PATH: &str = "data";
pub const DEFAULT_CONFIG_FILE: &str = "intake.toml";

// Stable machine-readable error codes returned to clients
pub const ERR_RATE_LIMITED: &str = "rate_limited";
pub const ERR_CANNOT_DECODE: &str = "cannot_decode_payload";
pub const ERR_INVALID_JSON: &str = "invalid_json_after_decode";
pub const ERR_INVALID_PAYLOAD: &str = "invalid_payload";
pub const ERR_INVALID_SCHEMA: &str = "invalid_schema";
pub const ERR_SERVER: &str = "server_error";

pub const MISSING_PARAMETERS: &str = "Missing parameters";
