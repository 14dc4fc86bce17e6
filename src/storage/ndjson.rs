use super::{DocumentStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Appends one JSON document per line to a daily-rotated file per collection.
/// Pattern: `<root>/<collection>_YYYY-MM-DD.ndjson`.
pub struct NdjsonStore {
    root: PathBuf,
    // Serializes appends so concurrent lines never interleave.
    write_lock: Mutex<()>,
}

impl NdjsonStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn current_file(&self, collection: &str) -> PathBuf {
        let date_str = Utc::now().format("%Y-%m-%d");
        self.root.join(format!("{collection}_{date_str}.ndjson"))
    }
}

#[async_trait]
impl DocumentStore for NdjsonStore {
    async fn insert(&self, collection: &str, document: Value) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(&document)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let path = self.current_file(collection);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %path.display(), bytes = line.len(), "Appended document");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ndjson"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn appends_one_line_per_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = NdjsonStore::open(dir.path()).unwrap();
        store.insert("telemetry", json!({"n": 1})).await.unwrap();
        store.insert("telemetry", json!({"n": 2})).await.unwrap();

        let contents = std::fs::read_to_string(store.current_file("telemetry")).unwrap();
        let lines: Vec<Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[tokio::test]
    async fn creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("data");
        let store = NdjsonStore::open(&root).unwrap();
        store.insert("telemetry", json!({})).await.unwrap();
        assert!(store.current_file("telemetry").starts_with(&root));
        assert!(store.current_file("telemetry").exists());
    }
}
