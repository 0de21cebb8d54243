//! OS keyring-backed secret storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, SecretStore, StoreError};

/// Account name attached to every keyring entry.
const ENTRY_USER: &str = "credforge";

/// OS keyring-backed secret store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// Each storage key becomes one entry whose service is `{service_name}/{key}`.
/// Every call goes to the platform keyring; nothing is cached in-process.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns [`StoreError::Unavailable`] if the keyring backend is not
    /// available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let probe = format!("{}/__probe__", service_name);
        match Entry::new(&probe, ENTRY_USER) {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Err(e) => Err(StoreError::Unavailable {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        let service = format!("{}/{}", self.service_name, key);
        Entry::new(&service, ENTRY_USER).map_err(|e| map_keyring_error(key, e))
    }
}

fn map_keyring_error(key: &str, error: keyring::Error) -> StoreError {
    match error {
        keyring::Error::NoStorageAccess(e) => {
            tracing::debug!("keyring refused access to {}: {}", key, e);
            StoreError::AccessDenied {
                key: key.to_string(),
            }
        }
        keyring::Error::BadEncoding(_) => StoreError::Corrupt {
            key: key.to_string(),
            message: "keyring entry is not valid UTF-8".to_string(),
        },
        keyring::Error::Ambiguous(_) => StoreError::Corrupt {
            key: key.to_string(),
            message: "ambiguous keyring entry".to_string(),
        },
        keyring::Error::PlatformFailure(e) => StoreError::Unavailable {
            message: format!("platform keyring failure: {}", e),
        },
        e => StoreError::BackendError {
            message: format!("keyring error: {}", e),
        },
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(password) => Ok(Some(Secret::new(password))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(key, e)),
        }
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(secret.expose())
            .map_err(|e| map_keyring_error(key, e))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(map_keyring_error(key, e)),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // Platform keyrings offer no portable enumeration.
        Err(StoreError::BackendError {
            message: format!(
                "list_keys not supported by keyring backend (requested prefix: {})",
                prefix
            ),
        })
    }
}
