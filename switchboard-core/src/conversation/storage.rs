//! Pluggable key-value backend for session snapshots
//!
//! The session store keeps live sessions in memory. When a backend is
//! attached, every mutation also writes a JSON snapshot under
//! `session:{id}`, and a session missing from memory is restored from its
//! snapshot on first access. Durable engines implement [`KeyValueStore`]
//! outside this crate.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

/// Minimal async key-value interface
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a value
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
}

/// In-memory backend for testing and single-process deployments
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryKeyValueStore::new();
        assert!(store.is_empty().await);

        store.put("a", b"1".to_vec()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.len().await, 1);

        store.put("a", b"2".to_vec()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("b").await.unwrap(), None);
    }
}
