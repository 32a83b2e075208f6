//! Storage error types.
//!
//! Every variant means the store could not be trusted for this operation;
//! the session and connection layers surface all of them as "store
//! unavailable".

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A key component is empty or would escape its directory.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The backend cannot be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A writer panicked while holding the in-memory map.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StorageError {
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            StorageError::invalid_key("..").to_string(),
            "Invalid key: .."
        );
        assert_eq!(
            StorageError::unavailable("redis down").to_string(),
            "Storage unavailable: redis down"
        );
    }

    #[test]
    fn test_wraps_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(StorageError::from(io), StorageError::Io(_)));

        let json = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        assert!(StorageError::from(json).to_string().starts_with("JSON error"));
    }
}
