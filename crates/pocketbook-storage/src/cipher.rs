//! AES-256-GCM primitives behind a small `Cipher` seam.
//!
//! Two framings exist in the wild for the same envelope: a detached tag
//! (native hosts) and `ciphertext || tag` (browser crypto). Both produce and
//! consume the tag as a separate 16-byte value so envelopes written by one
//! can be read by the other.

use aes_gcm::{
    aead::{Aead, AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use thiserror::Error;

use crate::key_provider::KeyMaterial;

/// Size of the AES-GCM nonce in bytes (96 bits).
pub const IV_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes (128 bits).
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("cipher init failed: invalid key length")]
    InvalidKey,
    #[error("invalid iv length: expected 12, got {0}")]
    InvalidIv(usize),
    #[error("invalid tag length: expected 16, got {0}")]
    InvalidTag(usize),
    #[error("encryption failed")]
    Encrypt,
    #[error("authentication failed: invalid key or corrupted data")]
    Authentication,
}

/// Ciphertext with its authentication tag held separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub data: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

pub trait Cipher: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    fn seal(
        &self,
        key: &KeyMaterial,
        iv: &[u8; IV_LEN],
        plaintext: &[u8],
    ) -> Result<Sealed, CipherError>;

    fn open(
        &self,
        key: &KeyMaterial,
        iv: &[u8],
        data: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, CipherError>;
}

/// Native framing: the primitive hands back the tag on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedAesGcm;

impl Cipher for DetachedAesGcm {
    fn name(&self) -> &'static str {
        "aes-256-gcm/detached"
    }

    fn seal(
        &self,
        key: &KeyMaterial,
        iv: &[u8; IV_LEN],
        plaintext: &[u8],
    ) -> Result<Sealed, CipherError> {
        let cipher = build_cipher(key)?;
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(iv), b"", &mut buffer)
            .map_err(|_| CipherError::Encrypt)?;

        let mut out = [0u8; TAG_LEN];
        out.copy_from_slice(tag.as_slice());
        Ok(Sealed {
            data: buffer,
            tag: out,
        })
    }

    fn open(
        &self,
        key: &KeyMaterial,
        iv: &[u8],
        data: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        check_lengths(iv, tag)?;
        let cipher = build_cipher(key)?;
        let mut buffer = data.to_vec();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(iv),
                b"",
                &mut buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| CipherError::Authentication)?;
        Ok(buffer)
    }
}

/// Browser framing: the primitive emits `ciphertext || tag`, so the last
/// `TAG_LEN` bytes are split off on seal and re-appended on open.
#[derive(Debug, Default, Clone, Copy)]
pub struct CombinedAesGcm;

impl Cipher for CombinedAesGcm {
    fn name(&self) -> &'static str {
        "aes-256-gcm/combined"
    }

    fn seal(
        &self,
        key: &KeyMaterial,
        iv: &[u8; IV_LEN],
        plaintext: &[u8],
    ) -> Result<Sealed, CipherError> {
        let cipher = build_cipher(key)?;
        let mut combined = cipher
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let split = combined
            .len()
            .checked_sub(TAG_LEN)
            .ok_or(CipherError::Encrypt)?;
        let tag_bytes = combined.split_off(split);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&tag_bytes);
        Ok(Sealed {
            data: combined,
            tag,
        })
    }

    fn open(
        &self,
        key: &KeyMaterial,
        iv: &[u8],
        data: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        check_lengths(iv, tag)?;
        let cipher = build_cipher(key)?;
        let mut combined = Vec::with_capacity(data.len() + tag.len());
        combined.extend_from_slice(data);
        combined.extend_from_slice(tag);
        cipher
            .decrypt(Nonce::from_slice(iv), combined.as_slice())
            .map_err(|_| CipherError::Authentication)
    }
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, CipherError> {
    Aes256Gcm::new_from_slice(&material.bytes).map_err(|_| CipherError::InvalidKey)
}

// `from_slice` panics on a length mismatch, so reject bad envelopes first.
fn check_lengths(iv: &[u8], tag: &[u8]) -> Result<(), CipherError> {
    if iv.len() != IV_LEN {
        return Err(CipherError::InvalidIv(iv.len()));
    }
    if tag.len() != TAG_LEN {
        return Err(CipherError::InvalidTag(tag.len()));
    }
    Ok(())
}
