//! Secure storage collaborator.
//!
//! Key material and the device name live in the host platform's secret
//! store. The engine only sees this trait; embedders hand in whatever
//! keystore they have. [`MemorySecretStore`] ships for tests and for
//! embedders without a platform keystore.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

/// Secure storage failure.
#[derive(Debug, Error)]
#[error("secure storage error: {0}")]
pub struct SecretsError(pub String);

/// Result type for secure storage operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// String key/value secret storage.
#[async_trait]
pub trait SecureStorage: Send + Sync {
    /// Read a value, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value; deleting an absent key is fine.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory secret store.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStorage for MemorySecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .expect("secret store lock poisoned")
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .expect("secret store lock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .expect("secret store lock poisoned")
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemorySecretStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v1").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v1".into()));

        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v2".into()));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        // Removing again is not an error.
        store.remove("k").await.unwrap();
    }
}
