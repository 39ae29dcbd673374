use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use pocketbook_core::storage::{InitOptions, KeyValueStore, StoreError};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// File holding global preferences inside the data directory.
pub const STORE_FILE_NAME: &str = "global-store.json";

/// Native preference backend: one JSON object on disk, rewritten atomically
/// after every mutation. Must be initialized before use.
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<Option<FileState>>,
}

struct FileState {
    entries: Map<String, Value>,
    persisted: bool,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    /// Store at `<data_dir>/global-store.json`.
    pub fn in_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(STORE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `entries` and only then make them visible. A failed write
    /// leaves the in-memory map as it was.
    async fn commit(
        &self,
        state: &mut FileState,
        entries: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let entries = if state.persisted {
            let path = self.path.clone();
            tokio::task::spawn_blocking(move || write_entries(&path, &entries).map(|()| entries))
                .await
                .map_err(storage_err)??
        } else {
            entries
        };
        state.entries = entries;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    #[instrument(skip_all, fields(persist = options.persist))]
    async fn init(&self, options: InitOptions) -> Result<(), StoreError> {
        let entries = if options.persist {
            let path = self.path.clone();
            tokio::task::spawn_blocking(move || load_entries(&path))
                .await
                .map_err(storage_err)?
        } else {
            Map::new()
        };
        debug!(path = ?self.path, entries = entries.len(), "preference store ready");

        *self.state.lock().await = Some(FileState {
            entries,
            persisted: options.persist,
        });
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let guard = self.state.lock().await;
        let state = initialized(&guard)?;
        Ok(state.entries.get(key).cloned())
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn set_item(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        let state = initialized_mut(&mut guard)?;
        let mut entries = state.entries.clone();
        entries.insert(key.to_string(), value);
        self.commit(state, entries).await
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        let state = initialized_mut(&mut guard)?;
        let mut entries = state.entries.clone();
        entries.remove(key);
        self.commit(state, entries).await
    }

    async fn multi_get(
        &self,
        keys: &[String],
    ) -> Result<BTreeMap<String, Option<Value>>, StoreError> {
        let guard = self.state.lock().await;
        let state = initialized(&guard)?;
        Ok(keys
            .iter()
            .map(|key| (key.clone(), state.entries.get(key).cloned()))
            .collect())
    }

    #[instrument(skip_all, fields(count = entries.len()))]
    async fn multi_set(&self, entries: Vec<(String, Value)>) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        let state = initialized_mut(&mut guard)?;
        let mut next = state.entries.clone();
        next.extend(entries);
        self.commit(state, next).await
    }

    #[instrument(skip_all, fields(count = keys.len()))]
    async fn multi_remove(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        let state = initialized_mut(&mut guard)?;
        let mut entries = state.entries.clone();
        for key in keys {
            entries.remove(key);
        }
        self.commit(state, entries).await
    }
}

fn initialized(state: &Option<FileState>) -> Result<&FileState, StoreError> {
    state.as_ref().ok_or_else(not_initialized)
}

fn initialized_mut(state: &mut Option<FileState>) -> Result<&mut FileState, StoreError> {
    state.as_mut().ok_or_else(not_initialized)
}

fn not_initialized() -> StoreError {
    StoreError::NotConfigured {
        reason: "preference store used before init".to_string(),
    }
}

// A missing or unreadable file starts an empty store rather than failing.
fn load_entries(path: &Path) -> Map<String, Value> {
    let buf = match fs::read(path) {
        Ok(buf) => buf,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Map::new(),
        Err(err) => {
            warn!(?path, error = %err, "preference store unreadable, starting empty");
            return Map::new();
        }
    };

    serde_json::from_slice(&buf).unwrap_or_else(|err| {
        warn!(?path, error = %err, "preference store is not a JSON object, starting empty");
        Map::new()
    })
}

fn write_entries(path: &Path, entries: &Map<String, Value>) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::Storage {
        reason: "invalid storage path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec(entries).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn storage_err<E: ToString>(err: E) -> StoreError {
    StoreError::Storage {
        reason: err.to_string(),
    }
}
