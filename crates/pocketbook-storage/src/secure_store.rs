use std::collections::BTreeMap;

use async_trait::async_trait;
use pocketbook_core::storage::{InitOptions, KeyValueStore, StoreError};
use serde_json::Value;
use tokio::task::{JoinError, JoinSet};
use tracing::instrument;

use crate::secure_values::SecureValues;

/// Any `KeyValueStore` with transparent encryption of sensitive keys.
/// Reads go through `read_from_storage` and writes through
/// `prepare_for_storage`, one key at a time; batches keep their batching.
pub struct SecureKeyValueStore<B: KeyValueStore> {
    backend: B,
    values: SecureValues,
}

impl<B: KeyValueStore> SecureKeyValueStore<B> {
    pub fn new(backend: B, values: SecureValues) -> Self {
        Self { backend, values }
    }

    /// The wrapped backend, for reading raw (possibly encrypted) entries.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn values(&self) -> &SecureValues {
        &self.values
    }
}

#[async_trait]
impl<B: KeyValueStore> KeyValueStore for SecureKeyValueStore<B> {
    async fn init(&self, options: InitOptions) -> Result<(), StoreError> {
        self.backend.init(options).await
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let stored = self.backend.get_item(key).await?;
        self.values.read_from_storage(key, stored).await
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn set_item(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let prepared = self.values.prepare_for_storage(key, value).await?;
        self.backend.set_item(key, prepared).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.backend.remove_item(key).await
    }

    #[instrument(skip_all, fields(count = keys.len()))]
    async fn multi_get(
        &self,
        keys: &[String],
    ) -> Result<BTreeMap<String, Option<Value>>, StoreError> {
        let stored = self.backend.multi_get(keys).await?;

        let mut tasks = JoinSet::new();
        for (key, value) in stored {
            let values = self.values.clone();
            tasks.spawn(async move {
                let read = values.read_from_storage(&key, value).await;
                (key, read)
            });
        }

        let mut out = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (key, read) = joined.map_err(join_err)?;
            out.insert(key, read?);
        }
        Ok(out)
    }

    #[instrument(skip_all, fields(count = entries.len()))]
    async fn multi_set(&self, entries: Vec<(String, Value)>) -> Result<(), StoreError> {
        let mut tasks = JoinSet::new();
        for (key, value) in entries {
            let values = self.values.clone();
            tasks.spawn(async move {
                let prepared = values.prepare_for_storage(&key, value).await;
                (key, prepared)
            });
        }

        let mut prepared = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let (key, value) = joined.map_err(join_err)?;
            prepared.push((key, value?));
        }
        self.backend.multi_set(prepared).await
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<(), StoreError> {
        self.backend.multi_remove(keys).await
    }
}

fn join_err(err: JoinError) -> StoreError {
    StoreError::Storage {
        reason: format!("secure value task failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use pocketbook_core::storage::MemoryStore;
    use serde_json::json;

    use super::*;
    use crate::{cipher::DetachedAesGcm, envelope::SecurePayload, key_provider::InMemoryKeyProvider};

    fn store() -> SecureKeyValueStore<MemoryStore> {
        SecureKeyValueStore::new(
            MemoryStore::new(),
            SecureValues::new(InMemoryKeyProvider::default(), DetachedAesGcm),
        )
    }

    #[tokio::test]
    async fn sensitive_items_are_encrypted_in_backend() {
        let store = store();
        store
            .set_item("user-token", json!("abc123"))
            .await
            .expect("set");

        let raw = store
            .backend()
            .get_item("user-token")
            .await
            .expect("raw get")
            .expect("present");
        assert!(SecurePayload::is_envelope(&raw));
        assert!(!raw.to_string().contains("abc123"));

        assert_eq!(
            store.get_item("user-token").await.expect("get"),
            Some(json!("abc123"))
        );
    }

    #[tokio::test]
    async fn other_items_are_stored_verbatim() {
        let store = store();
        store
            .set_item("some-other-pref", json!("abc123"))
            .await
            .expect("set");
        assert_eq!(
            store.backend().get_item("some-other-pref").await.expect("raw"),
            Some(json!("abc123"))
        );
    }

    #[tokio::test]
    async fn batches_wrap_each_key() {
        let store = store();
        let config = json!({ "url": "https://sync.example" });
        store
            .multi_set(vec![
                ("user-id".into(), json!("u-42")),
                ("syncServerConfig".into(), config.clone()),
                ("language".into(), json!("pt-BR")),
            ])
            .await
            .expect("multi_set");

        let keys: Vec<String> = ["user-id", "syncServerConfig", "language", "user-token"]
            .into_iter()
            .map(String::from)
            .collect();

        let raw = store.backend().multi_get(&keys).await.expect("raw");
        assert!(SecurePayload::is_envelope(raw["user-id"].as_ref().expect("user-id")));
        assert!(SecurePayload::is_envelope(
            raw["syncServerConfig"].as_ref().expect("config")
        ));
        assert_eq!(raw["language"], Some(json!("pt-BR")));

        let read = store.multi_get(&keys).await.expect("multi_get");
        assert_eq!(read["user-id"], Some(json!("u-42")));
        assert_eq!(read["syncServerConfig"], Some(config));
        assert_eq!(read["language"], Some(json!("pt-BR")));
        assert_eq!(read["user-token"], None);

        store.multi_remove(&keys).await.expect("multi_remove");
        let read = store.multi_get(&keys).await.expect("multi_get");
        assert!(read.values().all(Option::is_none));
    }

    #[tokio::test]
    async fn one_bad_entry_fails_the_whole_batch_read() {
        let store = store();
        store
            .backend()
            .set_item(
                "user-key",
                json!({ "__secure": true, "v": 1, "iv": "", "tag": "", "data": "" }),
            )
            .await
            .expect("seed");
        store
            .set_item("user-id", json!("fine"))
            .await
            .expect("set");

        let err = store
            .multi_get(&["user-id".to_string(), "user-key".to_string()])
            .await
            .expect_err("corrupt entry");
        assert!(matches!(err, StoreError::Envelope { .. }));
    }
}
