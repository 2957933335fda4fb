use async_trait::async_trait;
use chrono::Utc;
use common::crypto::PublicKey;
use common::directory::{
    DirectoryConfig, DirectoryError, DirectoryEvent, DirectoryEvents, KeyDirectory,
    RecipientKeyRecord, Registration,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tokio::sync::broadcast;

use super::{millis, Database};

/// Key directory persisted in SQLite
///
/// Registration is a single conditional upsert: the row is written only if the
/// device already exists for the user or the user is below the cap. SQLite
/// serializes writers, so two concurrent registrations cannot both pass the
/// check.
///
/// Change events are only delivered to subscribers of this process.
#[derive(Debug, Clone)]
pub struct SqliteKeyDirectory {
    db: Database,
    config: DirectoryConfig,
    events: DirectoryEvents,
}

impl SqliteKeyDirectory {
    pub fn new(db: Database, config: DirectoryConfig) -> Self {
        Self {
            db,
            config,
            events: DirectoryEvents::new(),
        }
    }
}

fn provider_error<E: std::fmt::Display>(e: E) -> DirectoryError {
    DirectoryError::Provider(e.to_string())
}

fn encode_key(key: &PublicKey) -> Result<String, DirectoryError> {
    serde_json::to_string(key).map_err(provider_error)
}

fn decode_key(json: &str) -> Result<PublicKey, DirectoryError> {
    serde_json::from_str(json).map_err(provider_error)
}

fn record_from_row(row: &SqliteRow) -> Result<RecipientKeyRecord, DirectoryError> {
    let encryption: String = row.get("encryption_public_key_jwk");
    let signing: Option<String> = row.get("signing_public_key_jwk");
    let mut record = RecipientKeyRecord::new(
        row.get::<String, _>("user_id"),
        row.get::<String, _>("device_id"),
        decode_key(&encryption)?,
    )
    .with_algorithm(row.get::<String, _>("algorithm"));
    record.signing_public_key = signing.as_deref().map(decode_key).transpose()?;
    Ok(record)
}

#[async_trait]
impl KeyDirectory for SqliteKeyDirectory {
    async fn register(&self, record: RecipientKeyRecord) -> Result<Registration, DirectoryError> {
        let now = millis(Utc::now());
        let signing = record
            .signing_public_key
            .as_ref()
            .map(encode_key)
            .transpose()?;

        let revision: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO device_keys (
                user_id, device_id, encryption_public_key_jwk, signing_public_key_jwk,
                algorithm, revision, registered_at, updated_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, 0, ?6, ?6
            WHERE EXISTS (
                SELECT 1 FROM device_keys WHERE user_id = ?1 AND device_id = ?2
            ) OR (
                SELECT COUNT(*) FROM device_keys WHERE user_id = ?1
            ) < ?7
            ON CONFLICT(user_id, device_id) DO UPDATE SET
                encryption_public_key_jwk = excluded.encryption_public_key_jwk,
                signing_public_key_jwk = excluded.signing_public_key_jwk,
                algorithm = excluded.algorithm,
                revision = device_keys.revision + 1,
                updated_at = excluded.updated_at
            RETURNING revision
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.device_id)
        .bind(encode_key(&record.encryption_public_key)?)
        .bind(signing)
        .bind(&record.algorithm)
        .bind(now)
        .bind(self.config.max_devices_per_user as i64)
        .fetch_optional(&*self.db)
        .await
        .map_err(provider_error)?;

        let outcome = match revision {
            None => {
                return Err(DirectoryError::DeviceLimitExceeded {
                    user_id: record.user_id,
                    limit: self.config.max_devices_per_user,
                })
            }
            Some(0) => Registration::Created,
            Some(_) => Registration::Replaced,
        };

        tracing::info!(user_id = %record.user_id, device_id = %record.device_id, ?outcome, "registered device key");
        self.events.notify(DirectoryEvent::DeviceRegistered {
            user_id: record.user_id,
            device_id: record.device_id,
        });
        Ok(outcome)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<RecipientKeyRecord>, DirectoryError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, device_id, encryption_public_key_jwk, signing_public_key_jwk, algorithm
            FROM device_keys
            WHERE user_id = ?
            ORDER BY device_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&*self.db)
        .await
        .map_err(provider_error)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn list_for_users(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<RecipientKeyRecord>, DirectoryError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT user_id, device_id, encryption_public_key_jwk, signing_public_key_jwk, algorithm \
             FROM device_keys WHERE user_id IN (",
        );
        let mut separated = query.separated(", ");
        for user_id in user_ids {
            separated.push_bind(user_id);
        }
        separated.push_unseparated(") ORDER BY user_id, device_id");

        let rows = query
            .build()
            .fetch_all(&*self.db)
            .await
            .map_err(provider_error)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn remove(&self, user_id: &str, device_id: &str) -> Result<bool, DirectoryError> {
        let result = sqlx::query("DELETE FROM device_keys WHERE user_id = ? AND device_id = ?")
            .bind(user_id)
            .bind(device_id)
            .execute(&*self.db)
            .await
            .map_err(provider_error)?;

        let removed = result.rows_affected() > 0;
        if removed {
            tracing::info!(%user_id, %device_id, "removed device key");
            self.events.notify(DirectoryEvent::DeviceRemoved {
                user_id: user_id.to_string(),
                device_id: device_id.to_string(),
            });
        }
        Ok(removed)
    }

    fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.events.subscribe()
    }
}
