//! Storage layer for mcplink.
//!
//! Both sides of the connection lifecycle persist through this crate:
//! - the server-side session store writes session metadata and its secondary
//!   indices here so that several server processes can share one view;
//! - the client-side connection store keeps its TTL-bounded cache of
//!   last-known-good connection records here so it survives restarts.
//!
//! Backends:
//! - JSON file storage (one file per key)
//! - In-memory storage (tests, single-process deployments)

pub mod error;
pub mod json;
pub mod memory;

pub use error::{StorageError, StorageResult};
pub use json::JsonStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// A trait for key-value storage backends.
///
/// Keys are represented as path segments, e.g. `["session", "mcs_01h..."]` or
/// `["connection", "srv1"]`. Values are serialized/deserialized as JSON.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value from storage.
    ///
    /// Returns `None` if the key doesn't exist.
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>>;

    /// Write a value to storage, replacing any previous value.
    async fn write<T: Serialize + Send + Sync>(&self, key: &[&str], value: &T)
        -> StorageResult<()>;

    /// Read-modify-write a value.
    ///
    /// The editor is called with the current value (or default if absent).
    /// Callers that need the read and the write to be atomic must serialize
    /// access to the key themselves.
    async fn update<T, F>(&self, key: &[&str], editor: F) -> StorageResult<T>
    where
        T: DeserializeOwned + Serialize + Send + Sync + Default,
        F: FnOnce(&mut T) + Send;

    /// Remove a value. Removing a missing key is not an error.
    async fn remove(&self, key: &[&str]) -> StorageResult<()>;

    /// List the keys directly under a prefix.
    ///
    /// Returns the full key paths for each item.
    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>>;

    /// Check if a key exists.
    async fn exists(&self, key: &[&str]) -> StorageResult<bool>;
}
