use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::clock::{DynClock, SystemClock};
use super::provider::{SessionStore, SessionStoreError};

/// Process-local session store
///
/// Suitable for a single relay process and for tests. Entries past their
/// expiry are invisible to readers but stay in the map until
/// [`SessionStore::purge_expired`] runs.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    clock: DynClock,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: DynClock) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Number of physically held entries, live or not.
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> SessionStoreError {
    SessionStoreError::Provider(format!("failed to acquire lock: {}", e))
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), SessionStoreError> {
        let ttl_chrono =
            chrono::Duration::from_std(ttl).map_err(|_| SessionStoreError::InvalidTtl(ttl))?;
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl_chrono)
            .ok_or(SessionStoreError::InvalidTtl(ttl))?;

        let mut inner = self.inner.write().map_err(lock_error)?;
        inner.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SessionStoreError> {
        let now = self.clock.now();
        let inner = self.inner.read().map_err(lock_error)?;
        Ok(inner
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn replace(&self, key: &str, value: Vec<u8>) -> Result<bool, SessionStoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write().map_err(lock_error)?;
        match inner.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.value = value;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, SessionStoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write().map_err(lock_error)?;
        Ok(inner
            .remove(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }

    async fn remove(&self, key: &str) -> Result<(), SessionStoreError> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        inner.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, SessionStoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write().map_err(lock_error)?;
        let before = inner.len();
        inner.retain(|_, entry| entry.is_live(now));
        Ok(before - inner.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::session_store::{ManualClock, SessionStoreExt};

    fn store() -> (MemorySessionStore, ManualClock) {
        let clock = ManualClock::default();
        (MemorySessionStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let (store, _) = store();
        store
            .put("a", b"one".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get("b").await.unwrap(), None);

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expiry_is_lazy() {
        let (store, clock) = store();
        store
            .put("a", b"one".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(10));
        assert!(store.get("a").await.unwrap().is_some());

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get("a").await.unwrap(), None);
        // still physically present until purged
        assert_eq!(store.len(), 1);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_replace_keeps_expiry() {
        let (store, clock) = store();
        store
            .put("a", b"one".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(5));
        assert!(store.replace("a", b"two".to_vec()).await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), Some(b"two".to_vec()));

        clock.advance(Duration::from_secs(6));
        assert!(!store.replace("a", b"three".to_vec()).await.unwrap());
        assert!(!store.replace("missing", b"x".to_vec()).await.unwrap());
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let (store, clock) = store();
        store
            .put("a", b"one".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.take("a").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.take("a").await.unwrap(), None);

        store
            .put("b", b"two".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(11));
        assert_eq!(store.take("b").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let (store, _) = store();
        store
            .put_json("k", &vec![1u32, 2, 3], Duration::from_secs(1))
            .await
            .unwrap();
        let value: Option<Vec<u32>> = store.get_json("k").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }
}
