//! Encrypted file-backed secret storage implementation.
//!
//! All entries live in one file: a 12-byte nonce followed by the AES-256-GCM
//! ciphertext of a JSON object mapping storage keys to secrets. The key is
//! derived from machine-specific values so the file is useless elsewhere.

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng, rand_core::RngCore},
};
use async_trait::async_trait;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use super::{Secret, SecretStore, StoreError};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const KEY_SALT: &[u8] = b"credforge-credential-file-v1";

/// Secret store persisted to a single encrypted file.
///
/// Every operation re-reads the file, so separate processes observe each
/// other's writes. Each read-modify-write holds an exclusive lock on a
/// sidecar `.lock` file, and the new contents are renamed over the original
/// from a uniquely named temporary file.
pub struct EncryptedFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    key: [u8; KEY_SIZE],
}

impl EncryptedFileStore {
    /// Open (or prepare to create) the store at `path`.
    ///
    /// Creates the parent directory if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::with_key(path, machine_key())
    }

    /// Open the store with an explicit encryption key.
    pub fn with_key(path: impl Into<PathBuf>, key: [u8; KEY_SIZE]) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable {
                message: format!("cannot create {}: {}", parent.display(), e),
            })?;
        }
        let lock_path = path.with_extension("lock");
        Ok(Self {
            path,
            lock_path,
            key,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cipher(&self) -> Result<Aes256Gcm, StoreError> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|e| StoreError::BackendError {
            message: format!("cipher init failed: {}", e),
        })
    }

    fn load(&self) -> Result<BTreeMap<String, Secret>, StoreError> {
        let encrypted = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(StoreError::AccessDenied {
                    key: self.path.display().to_string(),
                });
            }
            Err(e) => {
                return Err(StoreError::BackendError {
                    message: format!("failed to read {}: {}", self.path.display(), e),
                });
            }
        };

        if encrypted.len() < NONCE_SIZE {
            return Err(self.corrupt("file shorter than nonce"));
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
        let mut plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| self.corrupt("decryption failed"))?;

        let parsed = serde_json::from_slice(&plaintext).map_err(|e| self.corrupt(&e.to_string()));
        plaintext.zeroize();
        parsed
    }

    fn save(&self, entries: &BTreeMap<String, Secret>) -> Result<(), StoreError> {
        let mut json = serde_json::to_vec(entries)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), json.as_slice())
            .map_err(|e| StoreError::BackendError {
                message: format!("encryption failed: {}", e),
            });
        json.zeroize();
        let ciphertext = ciphertext?;

        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);

        let temp = self
            .path
            .with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        write_private(&temp, &output).and_then(|_| fs::rename(&temp, &self.path)).map_err(|e| {
            let _ = fs::remove_file(&temp);
            StoreError::BackendError {
                message: format!("failed to write {}: {}", self.path.display(), e),
            }
        })
    }

    fn corrupt(&self, message: &str) -> StoreError {
        StoreError::Corrupt {
            key: self.path.display().to_string(),
            message: message.to_string(),
        }
    }

    fn lock_error(&self, e: std::io::Error) -> StoreError {
        StoreError::BackendError {
            message: format!("failed to lock {}: {}", self.lock_path.display(), e),
        }
    }

    /// Run `f` while holding the sidecar lock. Released when the file closes.
    fn with_lock<T>(
        &self,
        exclusive: bool,
        f: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let lock = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| self.lock_error(e))?;

        if exclusive {
            lock.lock_exclusive()
        } else {
            lock.lock_shared()
        }
        .map_err(|e| self.lock_error(e))?;

        let result = f();
        if let Err(e) = lock.unlock() {
            tracing::debug!("Unlocking {} failed: {}", self.lock_path.display(), e);
        }
        result
    }

    /// Load, modify and save under the exclusive lock. An unreadable file is
    /// reported, never replaced.
    fn update<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Secret>) -> (T, bool),
    ) -> Result<T, StoreError> {
        self.with_lock(true, || {
            let mut entries = self.load()?;
            let (value, changed) = f(&mut entries);
            if changed {
                self.save(&entries)?;
            }
            Ok(value)
        })
    }
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::write(path, bytes)
}

/// Derive the file key from machine-specific entropy.
fn machine_key() -> [u8; KEY_SIZE] {
    let mut hasher = Sha256::new();

    #[cfg(target_os = "linux")]
    for candidate in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(id) = fs::read_to_string(candidate) {
            hasher.update(id.trim().as_bytes());
            break;
        }
    }

    if let Some(base) = directories::BaseDirs::new() {
        hasher.update(base.home_dir().to_string_lossy().as_bytes());
    }

    hasher.update(KEY_SALT);

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&hasher.finalize());
    key
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl SecretStore for EncryptedFileStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        self.with_lock(false, || Ok(self.load()?.remove(key)))
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), secret.clone());
            ((), true)
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.update(|entries| {
            let removed = entries.remove(key).is_some();
            (removed, removed)
        })
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.with_lock(false, || {
            Ok(self
                .load()?
                .into_keys()
                .filter(|k| k.starts_with(prefix))
                .collect())
        })
    }
}
