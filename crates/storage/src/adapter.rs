use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StorageError;

/// The key/value contract every backend implements. `iterate` returns a
/// materialized, key-sorted `Vec` rather than a true stream — every
/// implementation here buffers its whole keyspace in memory anyway, and a
/// `Vec` keeps the trait object-safe without boxing a stream type.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn open(&self) -> Result<(), StorageError>;
    async fn close(&self) -> Result<(), StorageError>;
    async fn persist(&self) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn put(&self, key: &str, value: String) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    async fn iterate(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError>;
}

/// A pure in-memory adapter. `persist` is a no-op; data does not survive
/// process restart. Useful for tests and for ephemeral/browser-style
/// deployments that never touch disk.
#[derive(Default)]
pub struct InMemoryStorage {
    map: RwLock<BTreeMap<String, String>>,
    open: AtomicBool,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
            open: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn open(&self) -> Result<(), StorageError> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn persist(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(StorageError::NotOpen);
        }
        Ok(self.map.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StorageError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(StorageError::NotOpen);
        }
        self.map.write().insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(StorageError::NotOpen);
        }
        self.map.write().remove(key);
        Ok(())
    }

    async fn iterate(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(StorageError::NotOpen);
        }
        Ok(self
            .map
            .read()
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// A persistent adapter backed by a single JSON-dumped file: the whole
/// keyspace held in memory and written out whole on `persist`/`close`, the
/// way `calimero-config`'s `ConfigFile` round-trips a single TOML/JSON
/// document rather than a real embedded database.
pub struct JsonFileStorage {
    path: PathBuf,
    map: RwLock<BTreeMap<String, String>>,
    open: AtomicBool,
}

#[derive(Serialize, Deserialize, Default)]
struct Dump {
    entries: BTreeMap<String, String>,
}

impl JsonFileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map: RwLock::new(BTreeMap::new()),
            open: AtomicBool::new(false),
        }
    }

    fn require_open(&self) -> Result<(), StorageError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::NotOpen)
        }
    }

    async fn write_dump(path: &Path, dump: &Dump) -> Result<(), StorageError> {
        let serialized = serde_json::to_vec_pretty(dump)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &serialized).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for JsonFileStorage {
    async fn open(&self) -> Result<(), StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let dump: Dump = serde_json::from_slice(&bytes)?;
                *self.map.write() = dump.entries;
                debug!(path = %self.path.display(), "loaded storage dump");
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no existing storage dump, starting empty");
            }
            Err(err) => return Err(err.into()),
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.persist().await?;
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn persist(&self) -> Result<(), StorageError> {
        self.require_open()?;
        let dump = Dump {
            entries: self.map.read().clone(),
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Self::write_dump(&self.path, &dump).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.require_open()?;
        Ok(self.map.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.require_open()?;
        self.map.write().insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.require_open()?;
        self.map.write().remove(key);
        Ok(())
    }

    async fn iterate(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        self.require_open()?;
        Ok(self
            .map
            .read()
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

impl Drop for JsonFileStorage {
    fn drop(&mut self) {
        if self.open.load(Ordering::SeqCst) {
            warn!(path = %self.path.display(), "JsonFileStorage dropped while still open; persist() was not called");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_put_get_iterate() {
        let storage = InMemoryStorage::new();
        storage.open().await.unwrap();
        storage.put("leaf:0:newData", "ab".to_owned()).await.unwrap();
        storage.put("leaf:1:newData", "cd".to_owned()).await.unwrap();
        storage.put("other:key", "xy".to_owned()).await.unwrap();

        let found = storage.iterate("leaf:").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(storage.get("leaf:0:newData").await.unwrap().as_deref(), Some("ab"));
    }

    #[tokio::test]
    async fn operations_require_open() {
        let storage = InMemoryStorage::new();
        assert!(matches!(storage.get("x").await, Err(StorageError::NotOpen)));
    }

    #[tokio::test]
    async fn json_file_storage_roundtrips_through_persist_and_reopen() {
        let path = std::env::temp_dir().join(format!(
            "accumulator-storage-test-{}-dump.json",
            std::process::id()
        ));

        {
            let storage = JsonFileStorage::new(&path);
            storage.open().await.unwrap();
            storage.put("leaf:0:newData", "ab".to_owned()).await.unwrap();
            storage.persist().await.unwrap();
        }

        let reopened = JsonFileStorage::new(&path);
        reopened.open().await.unwrap();
        assert_eq!(
            reopened.get("leaf:0:newData").await.unwrap().as_deref(),
            Some("ab")
        );

        let _ = std::fs::remove_file(&path);
    }
}
