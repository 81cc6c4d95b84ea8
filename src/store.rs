//! Shared data store — key→payload, write-once-then-read-many.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::StoreError;

/// Pool-wide store of large read-mostly inputs, addressed by key.
///
/// Payloads are held behind `Arc`, so every worker reads the same
/// allocation; nothing is copied per worker. Concurrent writes to the same
/// key are a caller error, not something the store arbitrates.
#[derive(Clone, Default)]
pub struct SharedStore {
    inner: Arc<RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a payload under `key`.
    ///
    /// Fails with a duplicate-key error if the key exists and `overwrite`
    /// is false.
    pub async fn add<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: T,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let key = key.into();
        let mut inner = self.inner.write().await;
        if inner.contains_key(&key) && !overwrite {
            return Err(StoreError::DuplicateKey { key });
        }
        inner.insert(key, Arc::new(value));
        Ok(())
    }

    /// Fetch a shared handle to the payload under `key`.
    pub async fn get<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>, StoreError> {
        let inner = self.inner.read().await;
        let payload = inner.get(key).ok_or_else(|| StoreError::KeyNotFound {
            key: key.to_string(),
        })?;
        Arc::clone(payload)
            .downcast::<T>()
            .map_err(|_| StoreError::WrongType {
                key: key.to_string(),
            })
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.read().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Split {
        actual: Vec<f64>,
    }

    #[tokio::test]
    async fn add_then_get_shares_the_allocation() {
        let store = SharedStore::new();
        store
            .add("sales", Split { actual: vec![1.0, 2.0] }, false)
            .await
            .unwrap();

        let first: Arc<Split> = store.get("sales").await.unwrap();
        let second: Arc<Split> = store.get("sales").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.actual, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn duplicate_key_rejected_unless_overwrite() {
        let store = SharedStore::new();
        store.add("sales", 1u32, false).await.unwrap();

        let err = store.add("sales", 2u32, false).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));

        store.add("sales", 2u32, true).await.unwrap();
        let value: Arc<u32> = store.get("sales").await.unwrap();
        assert_eq!(*value, 2);
    }

    #[tokio::test]
    async fn missing_key_and_wrong_type() {
        let store = SharedStore::new();
        let err = store.get::<u32>("absent").await.unwrap_err();
        assert!(matches!(err, StoreError::KeyNotFound { .. }));

        store.add("sales", 1u32, false).await.unwrap();
        let err = store.get::<String>("sales").await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType { .. }));
    }
}
