use super::{DocumentStore, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// In-memory store for development and tests
#[derive(Clone, Default)]
pub struct InMemoryStore {
    documents: Arc<Mutex<Vec<(String, Value)>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every document written to `collection`, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.lock()
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, doc)| doc.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, Value)>> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert(&self, collection: &str, document: Value) -> Result<(), StoreError> {
        let mut documents = self.lock();
        documents.push((collection.to_string(), document));
        debug!(collection, total = documents.len(), "Stored document in memory");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
