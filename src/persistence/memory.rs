//! In-memory record store.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::Mutex;

use crate::errors::StoreError;

use super::{RecordStore, StoreResult};

/// Record store backed by a process-local map.
///
/// Nothing survives a restart; intended for tests and embedders that
/// persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = StoreResult<String>> + Send + '_>> {
        let key = key.to_owned();
        Box::pin(async move {
            let entries = self.entries.lock().await;
            entries
                .get(&key)
                .cloned()
                .ok_or(StoreError::NotFound(key))
        })
    }

    fn set(
        &self,
        key: &str,
        value: String,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        let key = key.to_owned();
        Box::pin(async move {
            self.entries.lock().await.insert(key, value);
            Ok(())
        })
    }
}
