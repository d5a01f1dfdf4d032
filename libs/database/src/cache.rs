//! Cache abstraction.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::common::DatabaseResult;

/// String key/value cache.
///
/// Writes replace any existing value. Expiry is backend configuration, not
/// part of the call.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> DatabaseResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> DatabaseResult<()>;
}

#[async_trait]
impl<C: Cache + ?Sized> Cache for Arc<C> {
    async fn get(&self, key: &str) -> DatabaseResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> DatabaseResult<()> {
        (**self).set(key, value).await
    }
}

/// Process-local cache for tests and the dummy pipeline. Never expires.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> DatabaseResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> DatabaseResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
