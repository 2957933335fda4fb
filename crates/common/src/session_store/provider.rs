use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(thiserror::Error, Debug)]
pub enum SessionStoreError {
    /// The backing store failed. Surfaced as-is, never retried here.
    #[error("session store backend error: {0}")]
    Provider(String),
    #[error("ttl out of range: {0:?}")]
    InvalidTtl(Duration),
    #[error("failed to (de)serialize session record: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait SessionStore: Send + Sync + Debug {
    /// Insert or overwrite `key`, live for `ttl` from now.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration)
        -> Result<(), SessionStoreError>;

    /// Fetch a live entry.
    ///
    /// # Returns
    /// * `Ok(None)` - The key is unknown or its TTL has elapsed, whether or not
    ///   the entry has been physically purged
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SessionStoreError>;

    /// Atomically replace the value of a live entry, keeping its expiry.
    ///
    /// # Returns
    /// * `Ok(false)` - The entry is unknown or expired and nothing was written
    async fn replace(&self, key: &str, value: Vec<u8>) -> Result<bool, SessionStoreError>;

    /// Atomically remove a live entry and return its value.
    ///
    /// Of any number of concurrent callers, at most one sees `Some`.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, SessionStoreError>;

    async fn remove(&self, key: &str) -> Result<(), SessionStoreError>;

    /// Physically drop expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, SessionStoreError>;
}

pub type DynSessionStore = Arc<dyn SessionStore>;

/// JSON helpers over any [`SessionStore`]
#[async_trait]
pub trait SessionStoreExt: SessionStore {
    async fn put_json<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), SessionStoreError>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, bytes, ttl).await
    }

    async fn get_json<T>(&self, key: &str) -> Result<Option<T>, SessionStoreError>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn take_json<T>(&self, key: &str) -> Result<Option<T>, SessionStoreError>
    where
        T: DeserializeOwned + Send,
    {
        match self.take(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn replace_json<T>(&self, key: &str, value: &T) -> Result<bool, SessionStoreError>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.replace(key, bytes).await
    }
}

impl<S: SessionStore + ?Sized> SessionStoreExt for S {}
