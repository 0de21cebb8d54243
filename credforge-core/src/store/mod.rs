//! Secret storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for secret storage backends
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`EncryptedFileStore`] - AES-GCM encrypted file (with `file-store` feature)
//! - [`CredentialStore`] - Typed record layer over any [`SecretStore`]
//! - [`create_store`] - Helper to select a backend based on availability
//!
//! # Storage Key Convention
//!
//! Keys are produced by [`KeyNormalizer`](crate::target::KeyNormalizer), e.g.
//! `git:https://github.com` or `user@@https://host/repo@Mercurial`.
//!
//! # Example
//!
//! ```rust,ignore
//! use credforge_core::store::{Secret, SecretStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//!
//! let secret = Secret::new("super-secret-token");
//! store.set("git:https://github.com", &secret).await.unwrap();
//!
//! let retrieved = store.get("git:https://github.com").await.unwrap();
//! assert_eq!(retrieved.unwrap().expose(), "super-secret-token");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroize;

use crate::paths::AppPaths;

mod memory;
mod records;
#[cfg(feature = "keyring-store")]
mod keyring;
#[cfg(feature = "file-store")]
mod file;

pub use memory::MemoryStore;
pub use records::CredentialStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;
#[cfg(feature = "file-store")]
pub use file::EncryptedFileStore;

/// Service name used for keyring entries and file names.
pub const DEFAULT_SERVICE_NAME: &str = "credforge";

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value.
/// The buffer is zeroed on drop.
#[derive(Clone, Serialize, Deserialize)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested secret was not found.
    #[error("secret not found: {key}")]
    NotFound { key: String },

    /// The backing medium refused access.
    #[error("access denied to secret: {key}")]
    AccessDenied { key: String },

    /// A stored record could not be read back.
    #[error("corrupt record for {key}: {message}")]
    Corrupt { key: String, message: String },

    /// The backing medium is missing or not configured.
    #[error("secret store unavailable: {message}")]
    Unavailable { message: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Abstraction over secret storage backends.
///
/// Backends treat the medium as the source of truth and do not cache across
/// calls, so independent processes see each other's writes. Concurrent
/// writers to the same key resolve as last-writer-wins.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a secret by key.
    ///
    /// Returns `Ok(false)` if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// List all keys matching a prefix.
    ///
    /// Returns an empty vec if no keys match.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Which backing medium to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// OS keychain.
    #[default]
    Keyring,

    /// Encrypted file in the data directory.
    File,

    /// Process memory; nothing persists.
    Memory,
}

/// Create a secret store with automatic backend selection.
///
/// # Backend Selection Logic
///
/// - `Keyring`: tries [`KeyringStore`], falls back to the encrypted file
/// - `File`: tries [`EncryptedFileStore`], falls back to memory
/// - `Memory`: [`MemoryStore`]
///
/// Each fallback is logged at warn level.
pub fn create_store(backend: StoreBackend, paths: &AppPaths) -> Arc<dyn SecretStore> {
    if backend == StoreBackend::Keyring {
        #[cfg(feature = "keyring-store")]
        match KeyringStore::try_new(DEFAULT_SERVICE_NAME) {
            Ok(store) => {
                tracing::debug!("Using OS keyring for secret storage");
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Keyring unavailable ({}), falling back to encrypted file", e);
            }
        }

        #[cfg(not(feature = "keyring-store"))]
        tracing::warn!("Keyring storage requested but keyring-store feature not enabled");
    }

    if backend != StoreBackend::Memory {
        #[cfg(feature = "file-store")]
        match EncryptedFileStore::open(paths.credentials_file()) {
            Ok(store) => {
                tracing::debug!("Using encrypted file {:?} for secret storage", store.path());
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Encrypted file store unavailable ({}), falling back to memory", e);
            }
        }

        #[cfg(not(feature = "file-store"))]
        tracing::warn!(
            "File storage requested but file-store feature not enabled. \
             Secrets will not persist across invocations."
        );
    }

    let _ = paths;
    tracing::debug!("Using in-memory secret storage");
    Arc::new(MemoryStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("super-secret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_display_redacted() {
        let secret = Secret::new("super-secret");
        let display = format!("{}", secret);
        assert!(!display.contains("super-secret"));
        assert!(display.contains("REDACTED"));
    }

    #[test]
    fn test_secret_into_inner() {
        let secret = Secret::new("value");
        assert_eq!(secret.into_inner(), "value");
    }

    #[tokio::test]
    async fn test_create_store_memory() {
        let paths = AppPaths::in_dir(std::env::temp_dir().join("credforge-memory-test"));
        let store = create_store(StoreBackend::Memory, &paths);

        store.set("test-key", &Secret::new("test")).await.unwrap();
        let retrieved = store.get("test-key").await.unwrap();
        assert_eq!(retrieved.unwrap().expose(), "test");
    }

    #[cfg(feature = "file-store")]
    #[tokio::test]
    async fn test_create_store_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = AppPaths::in_dir(dir.path());
        let store = create_store(StoreBackend::File, &paths);

        store.set("test-key", &Secret::new("test")).await.unwrap();
        assert!(paths.credentials_file().exists());
    }
}
