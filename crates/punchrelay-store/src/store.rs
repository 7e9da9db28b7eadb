//! # Key-Value Store Abstraction
//!
//! The engine only needs two operations: read a string by key and durably
//! write one. [`KeyValueStore`] captures that, with the SQLite
//! [`Database`](crate::Database) for production and [`MemoryStore`] for
//! tests and throwaway runs.
//!
//! Typed documents are layered on top with [`load_json`] / [`save_json`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};

/// Durable string storage keyed by name.
///
/// `set` must not return `Ok` until the value is durable.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;
}

/// Reads and decodes a JSON document.
///
/// Returns `Ok(None)` when the key is absent and [`StoreError::Corrupt`]
/// when the stored text is not a valid `T`.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::corrupt(key, e.to_string())),
    }
}

/// Encodes and writes a JSON document.
pub async fn save_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let raw = serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    store.set(key, &raw).await
}

// =============================================================================
// Memory Store
// =============================================================================

/// Non-durable store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        MemoryStore {
            values: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        count: u32,
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await);

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_load_json_missing_is_none() {
        let store = MemoryStore::new();
        let doc: Option<Doc> = load_json(&store, "doc").await.unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_json() {
        let store = MemoryStore::new();
        save_json(&store, "doc", &Doc { count: 3 }).await.unwrap();

        let doc: Option<Doc> = load_json(&store, "doc").await.unwrap();
        assert_eq!(doc, Some(Doc { count: 3 }));
    }

    #[tokio::test]
    async fn test_load_json_reports_corruption() {
        let store = MemoryStore::with_entries([("doc", "not json")]);
        let err = load_json::<Doc>(&store, "doc").await.unwrap_err();
        assert!(err.is_corrupt());
    }
}
