use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::cipher::{Sealed, IV_LEN};

/// Member that marks a stored JSON object as an encrypted envelope.
pub const SECURE_MARKER: &str = "__secure";

/// Current envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("missing or invalid fields: {0}")]
    Malformed(String),
    #[error("unsupported envelope version: {0}")]
    Version(u32),
    #[error("invalid base64 in `{field}`: {reason}")]
    Encoding { field: &'static str, reason: String },
}

/// Persisted form of an encrypted value:
/// `{ "__secure": true, "v": 1, "iv": "..", "tag": "..", "data": ".." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurePayload {
    #[serde(rename = "__secure")]
    pub secure: bool,
    #[serde(rename = "v")]
    pub version: u32,
    pub iv: String,
    pub tag: String,
    pub data: String,
}

/// Raw bytes recovered from an envelope's base64 fields.
#[derive(Debug)]
pub struct DecodedPayload {
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
    pub data: Vec<u8>,
}

impl SecurePayload {
    pub fn new(iv: &[u8; IV_LEN], sealed: &Sealed) -> Self {
        Self {
            secure: true,
            version: ENVELOPE_VERSION,
            iv: STANDARD.encode(iv),
            tag: STANDARD.encode(sealed.tag),
            data: STANDARD.encode(&sealed.data),
        }
    }

    /// True when `value` is an object whose marker member is boolean `true`.
    pub fn is_envelope(value: &Value) -> bool {
        value.get(SECURE_MARKER).and_then(Value::as_bool) == Some(true)
    }

    pub fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        Self::deserialize(value).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "__secure": self.secure,
            "v": self.version,
            "iv": self.iv,
            "tag": self.tag,
            "data": self.data,
        })
    }

    pub fn decode(&self) -> Result<DecodedPayload, EnvelopeError> {
        if self.version != ENVELOPE_VERSION {
            return Err(EnvelopeError::Version(self.version));
        }
        Ok(DecodedPayload {
            iv: decode_field("iv", &self.iv)?,
            tag: decode_field("tag", &self.tag)?,
            data: decode_field("data", &self.data)?,
        })
    }
}

fn decode_field(field: &'static str, encoded: &str) -> Result<Vec<u8>, EnvelopeError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| EnvelopeError::Encoding {
            field,
            reason: e.to_string(),
        })
}
