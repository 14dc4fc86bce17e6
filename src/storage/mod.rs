pub mod in_memory;
pub mod ndjson;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use ndjson::NdjsonStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::{Config, StoreKind};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store write timed out after {0} ms")]
    Timeout(u64),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Write-only document sink. The pipeline never reads back what it stores.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, collection: &str, document: Value) -> Result<(), StoreError>;

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

/// Build the configured store. `None` means degraded mode: accepted telemetry is dropped.
pub fn build_store(config: &Config) -> Result<Option<Arc<dyn DocumentStore>>, StoreError> {
    let store: Option<Arc<dyn DocumentStore>> = match config.store {
        StoreKind::None => None,
        StoreKind::Memory => Some(Arc::new(InMemoryStore::new())),
        StoreKind::Ndjson => Some(Arc::new(NdjsonStore::open(&config.store_path)?)),
        StoreKind::Sqlite => Some(Arc::new(SqliteStore::open(&config.store_path)?)),
    };
    match &store {
        Some(s) => info!(store = s.name(), path = %config.store_path.display(), "Document store ready"),
        None => info!("No document store configured; running in degraded mode"),
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_kind_builds_no_store() {
        let config = Config::default();
        assert!(build_store(&config).unwrap().is_none());
    }

    #[test]
    fn memory_kind_builds_memory_store() {
        let config = Config {
            store: StoreKind::Memory,
            ..Config::default()
        };
        let store = build_store(&config).unwrap().unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn sqlite_kind_opens_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            store: StoreKind::Sqlite,
            store_path: dir.path().join("telemetry.db"),
            ..Config::default()
        };
        let store = build_store(&config).unwrap().unwrap();
        assert_eq!(store.name(), "sqlite");
        assert!(dir.path().join("telemetry.db").exists());
    }
}
