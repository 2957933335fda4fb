use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::crypto::PublicKey;

/// Device cap applied when no policy is configured
pub const DEFAULT_MAX_DEVICES_PER_USER: usize = 2;
/// Algorithm tag for P-256 ECDH key agreement feeding AES-256-GCM
pub const DEFAULT_ALGORITHM: &str = "ECDH-P256+A256GCM";

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryConfig {
    /// Maximum number of distinct devices a single user may register
    pub max_devices_per_user: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_devices_per_user: DEFAULT_MAX_DEVICES_PER_USER,
        }
    }
}

/// Server-visible projection of a device identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientKeyRecord {
    pub user_id: String,
    pub device_id: String,
    #[serde(rename = "encryptionPublicKeyJwk")]
    pub encryption_public_key: PublicKey,
    #[serde(
        rename = "signingPublicKeyJwk",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub signing_public_key: Option<PublicKey>,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

fn default_algorithm() -> String {
    DEFAULT_ALGORITHM.to_string()
}

impl RecipientKeyRecord {
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        encryption_public_key: PublicKey,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            encryption_public_key,
            signing_public_key: None,
            algorithm: default_algorithm(),
        }
    }

    pub fn with_signing_key(mut self, key: PublicKey) -> Self {
        self.signing_public_key = Some(key);
        self
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }
}

/// Outcome of a successful registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First registration of this device for the user
    Created,
    /// An existing record for the same device was superseded
    Replaced,
}

/// Change notifications for dependents holding recipient keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    DeviceRegistered { user_id: String, device_id: String },
    DeviceRemoved { user_id: String, device_id: String },
}

impl DirectoryEvent {
    pub fn user_id(&self) -> &str {
        match self {
            DirectoryEvent::DeviceRegistered { user_id, .. } => user_id,
            DirectoryEvent::DeviceRemoved { user_id, .. } => user_id,
        }
    }
}

/// Broadcast fan-out shared by directory backends
#[derive(Debug, Clone)]
pub struct DirectoryEvents {
    sender: broadcast::Sender<DirectoryEvent>,
}

impl DirectoryEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.sender.subscribe()
    }

    pub fn notify(&self, event: DirectoryEvent) {
        tracing::debug!(?event, "key directory changed");
        // no subscribers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for DirectoryEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DirectoryError {
    /// Registering a new device would exceed the per-user cap
    #[error("user {user_id} already has the maximum of {limit} registered devices")]
    DeviceLimitExceeded { user_id: String, limit: usize },
    #[error("unhandled key directory backend error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait KeyDirectory: Send + Sync + Debug {
    /// Upsert the record keyed by `(user_id, device_id)`
    ///
    /// Re-registering a known device supersedes its record and never counts
    /// against the cap. A new device is admitted only if the user's device count
    /// is below the cap; the check and the insert must be one atomic step.
    ///
    /// Should fail with the following errors to be considered correct:
    /// * `Err(DirectoryError::DeviceLimitExceeded)` - The device is new and the user is at the cap
    async fn register(&self, record: RecipientKeyRecord) -> Result<Registration, DirectoryError>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<RecipientKeyRecord>, DirectoryError>;

    /// Every device of every listed user, used to resolve "share with team"
    async fn list_for_users(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<RecipientKeyRecord>, DirectoryError>;

    /// Delete a device record
    ///
    /// Wraps already issued to the device in past envelopes are left in place.
    ///
    /// # Returns
    /// * `Ok(true)` - The record existed and was removed
    /// * `Ok(false)` - No such record
    async fn remove(&self, user_id: &str, device_id: &str) -> Result<bool, DirectoryError>;

    /// Subscribe to registration and removal events
    fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent>;
}

pub type DynKeyDirectory = Arc<dyn KeyDirectory>;
