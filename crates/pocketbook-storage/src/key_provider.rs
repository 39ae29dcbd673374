use std::{
    fmt,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::local_storage::LocalStorage;

/// Length of the symmetric key in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// File holding the raw key inside the application data directory.
pub const KEY_FILE_NAME: &str = "secure-store.key";

/// Browser local-storage entry holding the base64 key.
pub const LOCAL_STORAGE_KEY: &str = "__actual_secure_key__";

/// Key material used for encryption at rest. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// 256-bit symmetric key.
    pub bytes: [u8; KEY_LEN],
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("data directory is not set; cannot locate {}", KEY_FILE_NAME)]
    NotConfigured,
    #[error("key file error: {0}")]
    Io(String),
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("local storage error: {0}")]
    LocalStorage(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Provides the process encryption key, creating and persisting it on first use.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;
}

/// Native provider: raw key bytes in `secure-store.key` under the data directory.
/// A missing, unreadable or wrong-length file is replaced with a fresh key.
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    data_dir: Option<PathBuf>,
}

impl FileKeyProvider {
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        Self { data_dir }
    }

    pub fn key_path(&self) -> Result<PathBuf, KeyError> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(KEY_FILE_NAME))
            .ok_or(KeyError::NotConfigured)
    }
}

#[async_trait]
impl KeyProvider for FileKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let path = self.key_path()?;

        match tokio::fs::read(&path).await.map(Zeroizing::new) {
            Ok(existing) => match material_from_slice(&existing) {
                Ok(material) => {
                    debug!(?path, "loaded key file");
                    return Ok(material);
                }
                Err(_) => warn!(
                    ?path,
                    len = existing.len(),
                    "key file has unexpected length, generating a new key"
                ),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(?path, "no key file, generating a new key");
            }
            Err(err) => warn!(?path, error = %err, "key file unreadable, generating a new key"),
        }

        let material = generate_key();
        let bytes = Zeroizing::new(material.bytes);
        tokio::task::spawn_blocking(move || write_key_file(&path, &bytes[..]))
            .await
            .map_err(|e| KeyError::Io(e.to_string()))??;
        Ok(material)
    }
}

// Temp file plus rename, so a crash never leaves a truncated key behind.
// `NamedTempFile` creates the file owner-only (0600) on unix.
fn write_key_file(path: &Path, bytes: &[u8]) -> Result<(), KeyError> {
    let io_err = |e: std::io::Error| KeyError::Io(e.to_string());
    let parent = path
        .parent()
        .ok_or_else(|| KeyError::Io(format!("invalid key path: {}", path.display())))?;
    std::fs::create_dir_all(parent).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Browser provider: base64 key under `__actual_secure_key__` in local storage.
/// Without a storage handle the key lives only as long as the process.
#[derive(Clone, Default)]
pub struct LocalStorageKeyProvider {
    storage: Option<Arc<dyn LocalStorage>>,
}

impl LocalStorageKeyProvider {
    pub fn new(storage: Option<Arc<dyn LocalStorage>>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl KeyProvider for LocalStorageKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        if let Some(storage) = &self.storage {
            if let Some(stored) = storage.get_item(LOCAL_STORAGE_KEY).map(Zeroizing::new) {
                match decode_key(&stored) {
                    Ok(material) => return Ok(material),
                    Err(err) => warn!(error = %err, "stored browser key is malformed, replacing it"),
                }
            }
        }

        let material = generate_key();
        if let Some(storage) = &self.storage {
            storage
                .set_item(LOCAL_STORAGE_KEY, &encode_key(&material))
                .map_err(|e| KeyError::LocalStorage(e.to_string()))?;
        } else {
            debug!("no local storage available, using an ephemeral key");
        }
        Ok(material)
    }
}

/// OS keyring-backed provider. Uses the `keyring` crate to store the key.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        // Keyring operations are synchronous; wrap in async for trait compatibility.
        let entry = keyring::Entry::new(&self.service, &self.account).map_err(keyring_err)?;

        if let Some(material) = stored_keyring_key(entry.get_password())? {
            return Ok(material);
        }

        let material = generate_key();
        entry
            .set_password(&encode_key(&material))
            .map_err(keyring_err)?;
        Ok(material)
    }
}

// Only a missing or malformed entry may be replaced. A locked or unreachable
// keyring must not overwrite the key that existing values depend on.
fn stored_keyring_key(
    lookup: keyring::Result<String>,
) -> Result<Option<KeyMaterial>, KeyError> {
    match lookup.map(Zeroizing::new) {
        Ok(secret) => match decode_key(&secret) {
            Ok(material) => Ok(Some(material)),
            Err(err) => {
                warn!(error = %err, "keyring secret is malformed, replacing it");
                Ok(None)
            }
        },
        Err(keyring::Error::NoEntry) => {
            debug!("no keyring entry, generating a new key");
            Ok(None)
        }
        Err(err) => Err(keyring_err(err)),
    }
}

fn keyring_err(err: keyring::Error) -> KeyError {
    KeyError::Keyring(err.to_string())
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

impl InMemoryKeyProvider {
    /// Provider that always hands out the given key.
    pub fn with_key(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(KeyMaterial { bytes }))),
        }
    }
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let material = generate_key();
        *guard = Some(material.clone());
        Ok(material)
    }
}

fn generate_key() -> KeyMaterial {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial { bytes }
}

fn material_from_slice(bytes: &[u8]) -> Result<KeyMaterial, KeyError> {
    let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
        KeyError::Decode(format!("expected {KEY_LEN} bytes, got {}", bytes.len()))
    })?;
    Ok(KeyMaterial { bytes })
}

fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.bytes)
}

fn decode_key(secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map(Zeroizing::new)
        .map_err(|e| KeyError::Decode(e.to_string()))?;
    material_from_slice(&bytes)
}
