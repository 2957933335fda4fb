use async_trait::async_trait;
use chrono::Utc;
use common::envelope::{
    ContentEnvelope, EnvelopeError, EnvelopeStore, EnvelopeStoreError, WrappedKeyEntry,
};
use sqlx::Row;
use uuid::Uuid;

use super::{millis, Database};

/// Envelope store persisted in SQLite
///
/// The immutable part of an envelope is stored as one JSON document and each
/// wrap as its own row. Appending a wrap is a single insert, so the
/// `(envelope, recipient)` primary key rejects duplicates atomically and
/// existing wraps are never rewritten.
#[derive(Debug, Clone)]
pub struct SqliteEnvelopeStore {
    db: Database,
}

impl SqliteEnvelopeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn provider_error<E: std::fmt::Display>(e: E) -> EnvelopeStoreError {
    EnvelopeStoreError::Provider(e.to_string())
}

/// Envelope JSON with the wrap list emptied
fn envelope_body(envelope: &ContentEnvelope) -> Result<String, EnvelopeStoreError> {
    let mut body = serde_json::to_value(envelope).map_err(provider_error)?;
    if let Some(object) = body.as_object_mut() {
        object.insert("wrappedKeys".to_string(), serde_json::Value::Array(Vec::new()));
    }
    serde_json::to_string(&body).map_err(provider_error)
}

#[async_trait]
impl EnvelopeStore for SqliteEnvelopeStore {
    async fn put(&self, envelope: ContentEnvelope) -> Result<Uuid, EnvelopeStoreError> {
        let id = Uuid::new_v4();
        let id_text = id.to_string();
        let body = envelope_body(&envelope)?;

        let mut tx = self.db.begin().await.map_err(provider_error)?;
        sqlx::query(
            r#"
            INSERT INTO envelopes (id, sender_user_id, sender_device_id, body, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id_text)
        .bind(envelope.sender_user_id())
        .bind(envelope.sender_device_id())
        .bind(body)
        .bind(millis(Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(provider_error)?;

        for (position, entry) in envelope.wrapped_keys().iter().enumerate() {
            let entry_json = serde_json::to_string(entry).map_err(provider_error)?;
            sqlx::query(
                r#"
                INSERT INTO envelope_wraps
                    (envelope_id, position, recipient_user_id, recipient_device_id, entry)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id_text)
            .bind(position as i64)
            .bind(&entry.recipient_user_id)
            .bind(&entry.recipient_device_id)
            .bind(entry_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    EnvelopeStoreError::Envelope(EnvelopeError::DuplicateRecipient {
                        user_id: entry.recipient_user_id.clone(),
                        device_id: entry.recipient_device_id.clone(),
                    })
                }
                e => provider_error(e),
            })?;
        }
        tx.commit().await.map_err(provider_error)?;

        tracing::debug!(envelope_id = %id, "stored envelope");
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ContentEnvelope>, EnvelopeStoreError> {
        let id_text = id.to_string();
        let Some(row) = sqlx::query("SELECT body FROM envelopes WHERE id = ?")
            .bind(&id_text)
            .fetch_optional(&*self.db)
            .await
            .map_err(provider_error)?
        else {
            return Ok(None);
        };
        let body: String = row.get("body");
        let mut envelope: ContentEnvelope = serde_json::from_str(&body).map_err(provider_error)?;

        let wraps = sqlx::query(
            "SELECT entry FROM envelope_wraps WHERE envelope_id = ? ORDER BY position",
        )
        .bind(&id_text)
        .fetch_all(&*self.db)
        .await
        .map_err(provider_error)?;
        for wrap in wraps {
            let entry: String = wrap.get("entry");
            let entry: WrappedKeyEntry = serde_json::from_str(&entry).map_err(provider_error)?;
            envelope.append_wrap(entry)?;
        }
        Ok(Some(envelope))
    }

    async fn append_wrap(
        &self,
        id: Uuid,
        entry: WrappedKeyEntry,
    ) -> Result<(), EnvelopeStoreError> {
        let entry_json = serde_json::to_string(&entry).map_err(provider_error)?;
        let result = sqlx::query(
            r#"
            INSERT INTO envelope_wraps
                (envelope_id, position, recipient_user_id, recipient_device_id, entry)
            SELECT ?1, COALESCE(MAX(position), -1) + 1, ?2, ?3, ?4
            FROM envelope_wraps
            WHERE envelope_id = ?1
            "#,
        )
        .bind(id.to_string())
        .bind(&entry.recipient_user_id)
        .bind(&entry.recipient_device_id)
        .bind(entry_json)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(envelope_id = %id, recipient_device_id = %entry.recipient_device_id, "appended wrap");
                Ok(())
            }
            Err(sqlx::Error::Database(ref db)) if db.is_foreign_key_violation() => {
                Err(EnvelopeStoreError::NotFound(id))
            }
            Err(sqlx::Error::Database(ref db)) if db.is_unique_violation() => Err(
                EnvelopeStoreError::Envelope(EnvelopeError::DuplicateRecipient {
                    user_id: entry.recipient_user_id,
                    device_id: entry.recipient_device_id,
                }),
            ),
            Err(e) => Err(provider_error(e)),
        }
    }

    async fn authored_by(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Vec<Uuid>, EnvelopeStoreError> {
        let rows = sqlx::query(
            "SELECT id FROM envelopes WHERE sender_user_id = ? AND sender_device_id = ? ORDER BY seq",
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_all(&*self.db)
        .await
        .map_err(provider_error)?;

        rows.iter()
            .map(|row| Uuid::parse_str(row.get::<&str, _>("id")).map_err(provider_error))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use common::envelope::EnvelopeEngine;
    use common::identity::DeviceIdentity;

    use super::*;

    async fn store() -> SqliteEnvelopeStore {
        SqliteEnvelopeStore::new(Database::in_memory().await.unwrap())
    }

    fn sealed(author: &DeviceIdentity) -> ContentEnvelope {
        let bob = DeviceIdentity::generate("bob-desktop", true).unwrap();
        EnvelopeEngine::new()
            .encrypt(b"persisted", &[bob.public_record("bob")], "alice", author)
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = store().await;
        let author = DeviceIdentity::generate("laptop", true).unwrap();
        let envelope = sealed(&author);

        let id = store.put(envelope.clone()).await.unwrap();
        assert_eq!(store.get(id).await.unwrap(), Some(envelope.clone()));
        assert_eq!(store.get(Uuid::new_v4()).await.unwrap(), None);

        let plaintext = EnvelopeEngine::new()
            .decrypt(
                &store.get(id).await.unwrap().unwrap(),
                "laptop",
                author.encryption_key(),
            )
            .unwrap();
        assert_eq!(plaintext, b"persisted");
    }

    #[tokio::test]
    async fn test_append_wrap() {
        let store = store().await;
        let engine = EnvelopeEngine::new();
        let author = DeviceIdentity::generate("laptop", true).unwrap();
        let envelope = sealed(&author);
        let id = store.put(envelope.clone()).await.unwrap();

        let key = engine.recover_self_key(&envelope, "alice", &author).unwrap();
        let phone = DeviceIdentity::generate("phone", false).unwrap();
        let entry = engine.wrap_for(&key, &phone.public_record("alice")).unwrap();

        store.append_wrap(id, entry.clone()).await.unwrap();
        assert!(matches!(
            store.append_wrap(id, entry.clone()).await,
            Err(EnvelopeStoreError::Envelope(
                EnvelopeError::DuplicateRecipient { .. }
            ))
        ));
        assert!(matches!(
            store.append_wrap(Uuid::new_v4(), entry.clone()).await,
            Err(EnvelopeStoreError::NotFound(_))
        ));

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.wrapped_keys().len(), 3);
        // existing wraps untouched and in order
        assert_eq!(&stored.wrapped_keys()[..2], envelope.wrapped_keys());
        assert_eq!(stored.wrapped_keys()[2], entry);
    }

    #[tokio::test]
    async fn test_authored_by() {
        let store = store().await;
        let laptop = DeviceIdentity::generate("laptop", true).unwrap();
        let phone = DeviceIdentity::generate("phone", false).unwrap();

        let first = store.put(sealed(&laptop)).await.unwrap();
        store.put(sealed(&phone)).await.unwrap();
        let third = store.put(sealed(&laptop)).await.unwrap();

        assert_eq!(
            store.authored_by("alice", "laptop").await.unwrap(),
            vec![first, third]
        );
        assert!(store.authored_by("alice", "tablet").await.unwrap().is_empty());
    }
}
