use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::provider::{
    DirectoryConfig, DirectoryError, DirectoryEvent, DirectoryEvents, KeyDirectory,
    RecipientKeyRecord, Registration,
};

/// In-memory key directory
///
/// The device-cap check and the insert happen under one write lock, so two
/// concurrent registrations can never both pass the check.
#[derive(Debug, Clone)]
pub struct MemoryKeyDirectory {
    inner: Arc<RwLock<MemoryKeyDirectoryInner>>,
    config: DirectoryConfig,
    events: DirectoryEvents,
}

#[derive(Debug, Default)]
struct MemoryKeyDirectoryInner {
    /// user_id -> device_id -> record
    users: BTreeMap<String, BTreeMap<String, RecipientKeyRecord>>,
}

impl MemoryKeyDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryKeyDirectoryInner::default())),
            config,
            events: DirectoryEvents::new(),
        }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }
}

impl Default for MemoryKeyDirectory {
    fn default() -> Self {
        Self::new(DirectoryConfig::default())
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> DirectoryError {
    DirectoryError::Provider(format!("failed to acquire lock: {}", e))
}

#[async_trait]
impl KeyDirectory for MemoryKeyDirectory {
    async fn register(&self, record: RecipientKeyRecord) -> Result<Registration, DirectoryError> {
        let user_id = record.user_id.clone();
        let device_id = record.device_id.clone();

        let outcome = {
            let mut inner = self.inner.write().map_err(lock_error)?;
            let devices = inner.users.entry(user_id.clone()).or_default();

            if devices.contains_key(&device_id) {
                devices.insert(device_id.clone(), record);
                Registration::Replaced
            } else {
                if devices.len() >= self.config.max_devices_per_user {
                    return Err(DirectoryError::DeviceLimitExceeded {
                        user_id,
                        limit: self.config.max_devices_per_user,
                    });
                }
                devices.insert(device_id.clone(), record);
                Registration::Created
            }
        };

        tracing::info!(%user_id, %device_id, ?outcome, "registered device key");
        self.events
            .notify(DirectoryEvent::DeviceRegistered { user_id, device_id });
        Ok(outcome)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<RecipientKeyRecord>, DirectoryError> {
        let inner = self.inner.read().map_err(lock_error)?;
        Ok(inner
            .users
            .get(user_id)
            .map(|devices| devices.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_for_users(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<RecipientKeyRecord>, DirectoryError> {
        let wanted: BTreeSet<&String> = user_ids.iter().collect();
        let inner = self.inner.read().map_err(lock_error)?;
        Ok(wanted
            .into_iter()
            .filter_map(|user_id| inner.users.get(user_id))
            .flat_map(|devices| devices.values().cloned())
            .collect())
    }

    async fn remove(&self, user_id: &str, device_id: &str) -> Result<bool, DirectoryError> {
        let removed = {
            let mut inner = self.inner.write().map_err(lock_error)?;
            let removed = inner
                .users
                .get_mut(user_id)
                .and_then(|devices| devices.remove(device_id))
                .is_some();
            if inner.users.get(user_id).is_some_and(|d| d.is_empty()) {
                inner.users.remove(user_id);
            }
            removed
        };

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
