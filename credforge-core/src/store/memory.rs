//! Process-local secret store, used by tests and `--store memory`.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{Secret, SecretStore, StoreError};

/// Secrets held in an ordered map; nothing survives the process.
///
/// Keys are kept sorted, so `list_keys` answers in a stable order.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Secret>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with raw entries, bypassing any record encoding.
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Secret)>,
        K: Into<String>,
    {
        Self {
            entries: RwLock::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.len())
            .finish()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), secret.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryStore {
        MemoryStore::with_entries([
            ("git:https://github.com", Secret::new("t1")),
            ("git:https://github.com/org/repo", Secret::new("t2")),
            ("@https://hg.example.com@Mercurial", Secret::new("t3")),
            ("work:https://github.com", Secret::new("t4")),
        ])
    }

    #[tokio::test]
    async fn test_list_keys_by_namespace_prefix() {
        let store = seeded();

        assert_eq!(
            store.list_keys("git:https://github.com").await.unwrap(),
            vec!["git:https://github.com", "git:https://github.com/org/repo"]
        );
        assert_eq!(store.list_keys("work:").await.unwrap(), vec!["work:https://github.com"]);
        assert!(store.list_keys("hg:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_prefix_lists_everything_sorted() {
        let keys = seeded().list_keys("").await.unwrap();

        assert_eq!(keys.len(), 4);
        assert_eq!(keys[0], "@https://hg.example.com@Mercurial");
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let store = seeded();

        assert!(store.delete("work:https://github.com").await.unwrap());
        assert!(!store.delete("work:https://github.com").await.unwrap());
        assert!(!store.exists("work:https://github.com").await.unwrap());
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_set_replaces_secret() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.set("k", &Secret::new("first")).await.unwrap();
        store.set("k", &Secret::new("second")).await.unwrap();

        assert_eq!(store.get("k").await.unwrap().unwrap().expose(), "second");
        assert_eq!(store.len(), 1);
    }
}
