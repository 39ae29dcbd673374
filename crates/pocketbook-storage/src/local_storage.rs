//! Synchronous string storage modelled on the browser's Web Storage API.
//! Browser hosts hold the encryption key here rather than in the preference
//! store itself.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocalStorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), LocalStorageError>;
}

/// Process-local storage, for tests and hosts without a browser.
#[derive(Debug, Default, Clone)]
pub struct MemoryLocalStorage {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryLocalStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for MemoryLocalStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.inner.lock().ok()?.get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), LocalStorageError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|err| LocalStorageError::Unavailable(format!("lock poisoned: {err}")))?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
