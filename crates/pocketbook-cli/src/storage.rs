use std::path::PathBuf;

use crate::config::{Config, KeySource};
use color_eyre::Result;
use dirs::data_dir;
use pocketbook_core::storage::{InitOptions, KeyValueStore};
use pocketbook_storage::{
    cipher::DetachedAesGcm, key_provider::KeyringProvider, JsonFileStore, Platform,
    SecureKeyValueStore, SecureValues,
};
use tracing::debug;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "POCKETBOOK_DATA_DIR";

/// Resolve the data directory: config override, then environment, then platform default.
pub fn resolve_data_dir(config: &Config) -> Result<PathBuf> {
    if let Some(dir) = &config.data_dir {
        return Ok(dir.clone());
    }
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("pocketbook"))
}

/// Build the secure value layer for the configured key source.
pub fn secure_values(config: &Config, data_dir: PathBuf) -> SecureValues {
    match config.key_source {
        KeySource::File => SecureValues::for_platform(Platform::current(), Some(data_dir), None),
        KeySource::Keyring => SecureValues::new(
            KeyringProvider::new("pocketbook", "secure-store-key"),
            DetachedAesGcm,
        ),
    }
}

/// Open the preference store with encryption of sensitive keys.
pub async fn store_from_config(config: &Config) -> Result<SecureKeyValueStore<JsonFileStore>> {
    let root = resolve_data_dir(config)?;
    debug!(?root, key_source = ?config.key_source, "opening preference store");
    let store = SecureKeyValueStore::new(
        JsonFileStore::in_data_dir(&root),
        secure_values(config, root),
    );
    store.init(InitOptions::default()).await?;
    Ok(store)
}

/// Helper for tests to construct a store rooted at a temp dir with an in-memory key.
#[cfg(test)]
pub async fn test_store(root: impl Into<PathBuf>) -> SecureKeyValueStore<JsonFileStore> {
    use pocketbook_storage::key_provider::InMemoryKeyProvider;

    let store = SecureKeyValueStore::new(
        JsonFileStore::in_data_dir(root.into()),
        SecureValues::new(InMemoryKeyProvider::default(), DetachedAesGcm),
    );
    store
        .init(InitOptions::default())
        .await
        .expect("init test store");
    store
}
