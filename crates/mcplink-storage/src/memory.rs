//! In-memory storage implementation.
//!
//! Used by tests and by single-process deployments where the session store
//! does not need to be shared. It can be switched offline to exercise the
//! store-unavailable paths of its callers.

use crate::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// In-memory storage.
pub struct MemoryStorage {
    data: RwLock<HashMap<String, String>>,
    offline: AtomicBool,
}

impl MemoryStorage {
    /// Create a new in-memory storage.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate the backend becoming unreachable (or reachable again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("memory storage is offline"));
        }
        Ok(())
    }

    /// Convert a key slice to a storage key string.
    fn key_to_string(key: &[&str]) -> StorageResult<String> {
        if key.is_empty() || key.iter().any(|c| c.is_empty()) {
            return Err(StorageError::invalid_key(format!("{:?}", key)));
        }
        Ok(key
            .iter()
            .map(|c| urlencoding::encode(c).into_owned())
            .collect::<Vec<_>>()
            .join("/"))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>> {
        self.check_online()?;
        let key_str = Self::key_to_string(key)?;
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;

        match data.get(&key_str) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()> {
        self.check_online()?;
        let key_str = Self::key_to_string(key)?;
        let json = serde_json::to_string(value)?;

        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;
        data.insert(key_str, json);

        Ok(())
    }

    async fn update<T, F>(&self, key: &[&str], editor: F) -> StorageResult<T>
    where
        T: DeserializeOwned + Serialize + Send + Sync + Default,
        F: FnOnce(&mut T) + Send,
    {
        let mut value: T = self.read(key).await?.unwrap_or_default();
        editor(&mut value);
        self.write(key, &value).await?;
        Ok(value)
    }

    async fn remove(&self, key: &[&str]) -> StorageResult<()> {
        self.check_online()?;
        let key_str = Self::key_to_string(key)?;
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;
        data.remove(&key_str);
        Ok(())
    }

    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>> {
        self.check_online()?;
        let prefix_with_sep = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", Self::key_to_string(prefix)?)
        };

        let data = self
            .data
            .read()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;

        let mut results = Vec::new();
        for key in data.keys() {
            let Some(remainder) = key.strip_prefix(&prefix_with_sep) else {
                continue;
            };
            // Only direct children.
            if remainder.contains('/') {
                continue;
            }
            let parts = key
                .split('/')
                .map(|c| {
                    urlencoding::decode(c)
                        .map(|s| s.into_owned())
                        .map_err(|e| StorageError::invalid_key(e.to_string()))
                })
                .collect::<StorageResult<Vec<String>>>()?;
            results.push(parts);
        }

        Ok(results)
    }

    async fn exists(&self, key: &[&str]) -> StorageResult<bool> {
        self.check_online()?;
        let key_str = Self::key_to_string(key)?;
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;
        Ok(data.contains_key(&key_str))
    }
}
