//! Typed credential records over a [`SecretStore`].

use std::sync::Arc;

use super::{Secret, SecretStore, StoreError};
use crate::model::StoredRecord;

/// Reads and writes whole [`StoredRecord`]s, one per storage key.
///
/// A record is serialized to JSON and written with a single `set`, so
/// callers never observe a partially written credential.
///
/// Reads never fail: unreadable or unreachable records are reported as a
/// miss with a warning, letting the caller fall through to acquisition.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<dyn SecretStore>,
}

impl CredentialStore {
    pub fn new(inner: Arc<dyn SecretStore>) -> Self {
        Self { inner }
    }

    /// Load the record stored under `key`.
    pub async fn get(&self, key: &str) -> Option<StoredRecord> {
        match self.try_get(key).await {
            Ok(record) => record,
            Err(StoreError::NotFound { .. }) => None,
            Err(e) => {
                tracing::warn!("Treating {} as a cache miss: {}", key, e);
                None
            }
        }
    }

    /// Load the record stored under `key`, surfacing store errors.
    pub async fn try_get(&self, key: &str) -> Result<Option<StoredRecord>, StoreError> {
        let Some(raw) = self.inner.get(key).await? else {
            return Ok(None);
        };

        let record: StoredRecord =
            serde_json::from_str(raw.expose()).map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        if record.storage_key != key {
            return Err(StoreError::Corrupt {
                key: key.to_string(),
                message: format!("record belongs to {}", record.storage_key),
            });
        }

        Ok(Some(record))
    }

    /// Write `record` under its storage key, replacing any prior record.
    pub async fn set(&self, record: &StoredRecord) -> Result<(), StoreError> {
        let payload = Secret::new(serde_json::to_string(record)?);
        self.inner.set(&record.storage_key, &payload).await
    }

    /// Delete the record under `key`. Returns `false` if none existed.
    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Credential, TokenScope};
    use crate::store::MemoryStore;

    fn record(key: &str) -> StoredRecord {
        StoredRecord::new(key, Credential::new("haacked", "token123"))
            .with_scope(TokenScope::from("gist"))
            .with_refresh_token(Some(Secret::new("refresh")))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = CredentialStore::new(Arc::new(MemoryStore::new()));
        let original = record("git:https://github.com");

        store.set(&original).await.unwrap();
        assert_eq!(store.get("git:https://github.com").await, Some(original));

        assert!(store.delete("git:https://github.com").await.unwrap());
        assert_eq!(store.get("git:https://github.com").await, None);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let backend = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(backend.clone());

        store.set(&record("k")).await.unwrap();
        let replacement = StoredRecord::new("k", Credential::new("other", "pw"));
        store.set(&replacement).await.unwrap();

        assert_eq!(store.get("k").await, Some(replacement));
        assert_eq!(backend.list_keys("k").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_a_miss() {
        let backend = MemoryStore::with_entries([("k", Secret::new("{not json"))]);
        let store = CredentialStore::new(Arc::new(backend));

        assert_eq!(store.get("k").await, None);
        assert!(matches!(store.try_get("k").await, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_misfiled_record_is_a_miss() {
        let backend = Arc::new(MemoryStore::new());
        let json = serde_json::to_string(&record("elsewhere")).unwrap();
        backend.set("k", &Secret::new(json)).await.unwrap();

        let store = CredentialStore::new(backend);
        assert_eq!(store.get("k").await, None);
    }
}
