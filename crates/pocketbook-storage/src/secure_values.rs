use std::{path::PathBuf, sync::Arc};

use pocketbook_core::{sensitive::is_sensitive_key, storage::StoreError};
use rand::{rngs::OsRng, RngCore};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::{
    cipher::{Cipher, CipherError, CombinedAesGcm, DetachedAesGcm, IV_LEN},
    envelope::SecurePayload,
    key_provider::{FileKeyProvider, KeyError, KeyMaterial, KeyProvider, LocalStorageKeyProvider},
    local_storage::LocalStorage,
};

/// Host environment the process runs in. Decides where the key lives and
/// which cipher framing is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Native,
    Browser,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_arch = "wasm32") {
            Platform::Browser
        } else {
            Platform::Native
        }
    }
}

/// Encrypts values for sensitive keys before they are stored and decrypts
/// them on the way back out. Values for other keys pass through untouched.
///
/// The key is provisioned on first use and cached for the lifetime of the
/// handle; clones share the same cache.
#[derive(Clone)]
pub struct SecureValues {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Box<dyn KeyProvider>,
    cipher: Box<dyn Cipher>,
    key: OnceCell<KeyMaterial>,
}

impl SecureValues {
    pub fn new(provider: impl KeyProvider + 'static, cipher: impl Cipher + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider: Box::new(provider),
                cipher: Box::new(cipher),
                key: OnceCell::new(),
            }),
        }
    }

    /// Key file in `data_dir`, detached-tag cipher.
    pub fn native(data_dir: Option<PathBuf>) -> Self {
        Self::new(FileKeyProvider::new(data_dir), DetachedAesGcm)
    }

    /// Key in browser local storage, combined-output cipher.
    pub fn browser(storage: Option<Arc<dyn LocalStorage>>) -> Self {
        Self::new(LocalStorageKeyProvider::new(storage), CombinedAesGcm)
    }

    pub fn for_platform(
        platform: Platform,
        data_dir: Option<PathBuf>,
        storage: Option<Arc<dyn LocalStorage>>,
    ) -> Self {
        match platform {
            Platform::Native => Self::native(data_dir),
            Platform::Browser => Self::browser(storage),
        }
    }

    pub fn cipher_name(&self) -> &'static str {
        self.inner.cipher.name()
    }

    /// Turn `value` into what should be written under `key`.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn prepare_for_storage(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        if !is_sensitive_key(key) || value.is_null() || SecurePayload::is_envelope(&value) {
            return Ok(value);
        }

        let plaintext = match value {
            Value::String(text) => text,
            other => serde_json::to_string(&other).map_err(|e| StoreError::Serialization {
                reason: e.to_string(),
            })?,
        };

        let material = self.key().await?;
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let sealed = self
            .inner
            .cipher
            .seal(material, &iv, plaintext.as_bytes())
            .map_err(|e| StoreError::Encrypt {
                reason: e.to_string(),
            })?;

        Ok(SecurePayload::new(&iv, &sealed).to_value())
    }

    /// Turn whatever is stored under `key` back into the caller's value.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn read_from_storage(
        &self,
        key: &str,
        stored: Option<Value>,
    ) -> Result<Option<Value>, StoreError> {
        let value = match stored {
            Some(value)
                if is_sensitive_key(key)
                    && !value.is_null()
                    && SecurePayload::is_envelope(&value) =>
            {
                value
            }
            other => return Ok(other),
        };

        let envelope_err = |reason: String| StoreError::Envelope {
            key: key.to_string(),
            reason,
        };
        let decoded = SecurePayload::from_value(&value)
            .and_then(|payload| payload.decode())
            .map_err(|e| envelope_err(e.to_string()))?;

        let material = self.key().await?;
        let plaintext = self
            .inner
            .cipher
            .open(material, &decoded.iv, &decoded.data, &decoded.tag)
            .map_err(|e| match e {
                CipherError::InvalidIv(_) | CipherError::InvalidTag(_) => {
                    envelope_err(e.to_string())
                }
                _ => StoreError::Decrypt {
                    key: key.to_string(),
                },
            })?;

        let text = String::from_utf8(plaintext).map_err(|e| StoreError::Serialization {
            reason: format!("decrypted value is not UTF-8: {e}"),
        })?;

        // Sensitive values may have been stored as plain strings, which are
        // returned as-is when they do not parse as JSON.
        Ok(Some(
            serde_json::from_str(&text).unwrap_or(Value::String(text)),
        ))
    }

    async fn key(&self) -> Result<&KeyMaterial, StoreError> {
        self.inner
            .key
            .get_or_try_init(|| async {
                debug!(cipher = self.cipher_name(), "provisioning secure storage key");
                self.inner.provider.get_or_create().await.map_err(key_err)
            })
            .await
    }
}

fn key_err(err: KeyError) -> StoreError {
    match err {
        KeyError::NotConfigured => StoreError::NotConfigured {
            reason: err.to_string(),
        },
        other => StoreError::Key {
            reason: other.to_string(),
        },
    }
}
