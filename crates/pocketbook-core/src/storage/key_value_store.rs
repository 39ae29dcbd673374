use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors produced by preference storage backends and the secure value layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Required configuration (e.g. the data directory) is missing.
    #[error("storage not configured: {reason}")]
    NotConfigured { reason: String },
    /// Encryption key could not be loaded, generated or persisted.
    #[error("key provisioning failed: {reason}")]
    Key { reason: String },
    /// Cipher failure while sealing a value.
    #[error("encryption failed: {reason}")]
    Encrypt { reason: String },
    /// Authentication failed: tampered envelope or key mismatch.
    #[error("decryption failed for key: {key}")]
    Decrypt { key: String },
    /// Value carries the secure marker but is not a usable envelope.
    #[error("malformed secure envelope for key {key}: {reason}")]
    Envelope { key: String, reason: String },
    /// Value could not be converted to or from its text form.
    #[error("serialization failure: {reason}")]
    Serialization { reason: String },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Options accepted by [`KeyValueStore::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOptions {
    /// Load from and write back to durable storage. When false the store
    /// starts empty and lives only in memory.
    pub persist: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self { persist: true }
    }
}

/// Async key/value contract used for global preferences.
///
/// Values are arbitrary JSON. A missing key reads back as `None`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Prepare the backend for use (load persisted state, open handles).
    async fn init(&self, options: InitOptions) -> Result<(), StoreError>;

    /// Retrieve the value for a key, or `None` when absent.
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Persist a value under a key, overwriting any existing entry.
    async fn set_item(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove a key and its value (idempotent).
    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    /// Retrieve several keys at once. Every requested key appears in the result.
    async fn multi_get(
        &self,
        keys: &[String],
    ) -> Result<BTreeMap<String, Option<Value>>, StoreError>;

    /// Persist several entries as one batch.
    async fn multi_set(&self, entries: Vec<(String, Value)>) -> Result<(), StoreError>;

    /// Remove several keys as one batch.
    async fn multi_remove(&self, keys: &[String]) -> Result<(), StoreError>;
}

/// In-memory backend for tests and hosts without durable storage.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>, StoreError> {
        self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn init(&self, options: InitOptions) -> Result<(), StoreError> {
        // Nothing to load; a non-persistent init still starts from scratch.
        if !options.persist {
            self.lock()?.clear();
        }
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn multi_get(
        &self,
        keys: &[String],
    ) -> Result<BTreeMap<String, Option<Value>>, StoreError> {
        let map = self.lock()?;
        Ok(keys
            .iter()
            .map(|key| (key.clone(), map.get(key).cloned()))
            .collect())
    }

    async fn multi_set(&self, entries: Vec<(String, Value)>) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        map.extend(entries);
        Ok(())
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        for key in keys {
            map.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn round_trips_json_values() {
        let store = MemoryStore::new();
        let value = json!({ "url": "https://sync.example", "port": 5006 });

        store
            .set_item("syncServerConfig", value.clone())
            .await
            .expect("set should succeed");
        let retrieved = store
            .get_item("syncServerConfig")
            .await
            .expect("get should succeed");

        assert_eq!(retrieved, Some(value));
        assert_eq!(store.get_item("missing").await.expect("get"), None);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = MemoryStore::new();
        store.set_item("k", json!("v")).await.expect("set");
        store.remove_item("k").await.expect("remove");
        store.remove_item("k").await.expect("remove again");

        assert_eq!(store.get_item("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn batch_operations_cover_every_key() {
        let store = MemoryStore::new();
        store
            .multi_set(vec![
                ("a".into(), json!(1)),
                ("b".into(), json!([true, false])),
            ])
            .await
            .expect("multi_set");

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values = store.multi_get(&keys).await.expect("multi_get");
        assert_eq!(values.len(), 3);
        assert_eq!(values["a"], Some(json!(1)));
        assert_eq!(values["b"], Some(json!([true, false])));
        assert_eq!(values["c"], None);

        store
            .multi_remove(&keys[..2])
            .await
            .expect("multi_remove");
        let values = store.multi_get(&keys).await.expect("multi_get");
        assert!(values.values().all(Option::is_none));
    }

    #[tokio::test]
    async fn non_persistent_init_clears_state() {
        let store = MemoryStore::new();
        store.set_item("k", json!("v")).await.expect("set");
        store
            .init(InitOptions { persist: false })
            .await
            .expect("init");

        assert_eq!(store.get_item("k").await.expect("get"), None);
    }
}
