use super::{DocumentStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Documents kept as JSON text in a single SQLite table.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS documents (
                id           TEXT PRIMARY KEY,
                collection   TEXT NOT NULL,
                received_at  INTEGER NOT NULL,
                body         TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS documents_collection ON documents (collection);
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert(&self, collection: &str, document: Value) -> Result<(), StoreError> {
        // Falls back to write time for documents that were never enriched.
        let received_at = document
            .get("receivedAt")
            .and_then(Value::as_i64)
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let body = serde_json::to_string(&document)?;
        let collection = collection.to_string();
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = lock(&conn);
            conn.execute(
                "INSERT INTO documents (id, collection, received_at, body) VALUES (?1, ?2, ?3, ?4)",
                params![Uuid::new_v4().to_string(), collection, received_at, body],
            )?;
            Ok(())
        })
        .await?
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
