use std::time::Duration;

use async_trait::async_trait;
use common::session_store::{DynClock, SessionStore, SessionStoreError};
use sqlx::Row;

use super::{millis, Database};

/// Session store shared by every relay process pointed at the same database
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    db: Database,
    clock: DynClock,
}

impl SqliteSessionStore {
    pub fn new(db: Database, clock: DynClock) -> Self {
        Self { db, clock }
    }

    fn now_millis(&self) -> i64 {
        millis(self.clock.now())
    }
}

fn provider_error(e: sqlx::Error) -> SessionStoreError {
    SessionStoreError::Provider(e.to_string())
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), SessionStoreError> {
        let ttl_millis = i64::try_from(ttl.as_millis())
            .map_err(|_| SessionStoreError::InvalidTtl(ttl))?;
        let expires_at = self
            .now_millis()
            .checked_add(ttl_millis)
            .ok_or(SessionStoreError::InvalidTtl(ttl))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (key, value, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&*self.db)
        .await
        .map_err(provider_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SessionStoreError> {
        let row = sqlx::query("SELECT value FROM sessions WHERE key = ? AND expires_at >= ?")
            .bind(key)
            .bind(self.now_millis())
            .fetch_optional(&*self.db)
            .await
            .map_err(provider_error)?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn replace(&self, key: &str, value: Vec<u8>) -> Result<bool, SessionStoreError> {
        let result = sqlx::query("UPDATE sessions SET value = ? WHERE key = ? AND expires_at >= ?")
            .bind(value)
            .bind(key)
            .bind(self.now_millis())
            .execute(&*self.db)
            .await
            .map_err(provider_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, SessionStoreError> {
        let row = sqlx::query(
            "DELETE FROM sessions WHERE key = ? AND expires_at >= ? RETURNING value",
        )
        .bind(key)
        .bind(self.now_millis())
        .fetch_optional(&*self.db)
        .await
        .map_err(provider_error)?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn remove(&self, key: &str) -> Result<(), SessionStoreError> {
        sqlx::query("DELETE FROM sessions WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, SessionStoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(self.now_millis())
            .execute(&*self.db)
            .await
            .map_err(provider_error)?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use common::session_store::{ManualClock, SessionStoreExt};

    use super::*;

    async fn store() -> (SqliteSessionStore, ManualClock) {
        let clock = ManualClock::default();
        let db = Database::in_memory().await.unwrap();
        (SqliteSessionStore::new(db, Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_lazy_expiry() {
        let (store, clock) = store().await;
        store
            .put("a", b"one".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(!store.replace("a", b"two".to_vec()).await.unwrap());

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replace_and_take() {
        let (store, _) = store().await;
        store
            .put_json("k", &vec![1u8, 2], Duration::from_secs(10))
            .await
            .unwrap();
        assert!(store.replace_json("k", &vec![3u8]).await.unwrap());

        let taken: Option<Vec<u8>> = store.take_json("k").await.unwrap();
        assert_eq!(taken, Some(vec![3]));
        assert_eq!(store.take("k").await.unwrap(), None);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (store, _) = store().await;
        store
            .put("k", b"a".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        store
            .put("k", b"b".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"b".to_vec()));
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
