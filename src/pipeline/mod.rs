pub mod config_response;
pub mod enrich;
pub mod ingest;

pub use config_response::{ClientConfig, ConfigLookupError, ConfigProfile, ConfigResponder};
pub use enrich::enrich;
pub use ingest::{IngestBody, IngestError, IngestRequest, IngestionPipeline};
