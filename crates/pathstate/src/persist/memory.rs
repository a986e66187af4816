use super::SessionStorage;
use crate::error::PersistenceError;
use async_trait::async_trait;
use std::collections::HashMap;

/// In-memory session storage for tests and single-process hosts.
///
/// Items live as long as the storage value does.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    items: tokio::sync::RwLock<HashMap<String, String>>,
}

impl MemorySessionStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an item before the storage is shared.
    #[must_use]
    pub fn with_item(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.items.get_mut().insert(key.into(), value.into());
        self
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    pub async fn remove_item(&self, key: &str) -> Option<String> {
        self.items.write().await.remove(key)
    }
}

#[async_trait]
impl SessionStorage for MemorySessionStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.items
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
