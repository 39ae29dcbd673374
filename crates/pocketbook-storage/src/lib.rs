//! Concrete preference storage with encryption at rest for sensitive keys.
//! Uses AES-256-GCM with keys sourced from a key file, browser local storage,
//! the OS keyring, or test doubles.

pub mod cipher;
pub mod envelope;
pub mod json_file_store;
pub mod key_provider;
pub mod local_storage;
pub mod secure_store;
pub mod secure_values;

pub use json_file_store::JsonFileStore;
pub use secure_store::SecureKeyValueStore;
pub use secure_values::{Platform, SecureValues};
