use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use super::types::{ContentEnvelope, WrappedKeyEntry};
use super::EnvelopeError;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeStoreError {
    #[error("envelope not found: {0}")]
    NotFound(Uuid),
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("envelope store error: {0}")]
    Provider(String),
}

/// Persistence for sealed envelopes
///
/// The store only ever sees ciphertext and public wrap material. Wraps are
/// append-only: `append_wrap` must never rewrite an existing entry.
#[async_trait]
pub trait EnvelopeStore: Send + Sync + Debug {
    async fn put(&self, envelope: ContentEnvelope) -> Result<Uuid, EnvelopeStoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<ContentEnvelope>, EnvelopeStoreError>;

    /// Atomically append one wrap to a stored envelope
    async fn append_wrap(&self, id: Uuid, entry: WrappedKeyEntry)
        -> Result<(), EnvelopeStoreError>;

    /// Ids of envelopes whose metadata names the given author device,
    /// oldest first
    async fn authored_by(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Vec<Uuid>, EnvelopeStoreError>;
}

pub type DynEnvelopeStore = Arc<dyn EnvelopeStore>;

#[derive(Debug, Clone, Default)]
pub struct MemoryEnvelopeStore {
    inner: Arc<RwLock<MemoryEnvelopeStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryEnvelopeStoreInner {
    envelopes: BTreeMap<Uuid, ContentEnvelope>,
    /// insertion order, for stable `authored_by` results
    order: Vec<Uuid>,
}

impl MemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> EnvelopeStoreError {
    EnvelopeStoreError::Provider(format!("failed to acquire lock: {}", e))
}

#[async_trait]
impl EnvelopeStore for MemoryEnvelopeStore {
    async fn put(&self, envelope: ContentEnvelope) -> Result<Uuid, EnvelopeStoreError> {
        let id = Uuid::new_v4();
        let mut inner = self.inner.write().map_err(lock_error)?;
        inner.envelopes.insert(id, envelope);
        inner.order.push(id);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ContentEnvelope>, EnvelopeStoreError> {
        let inner = self.inner.read().map_err(lock_error)?;
        Ok(inner.envelopes.get(&id).cloned())
    }

    async fn append_wrap(
        &self,
        id: Uuid,
        entry: WrappedKeyEntry,
    ) -> Result<(), EnvelopeStoreError> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        let envelope = inner
            .envelopes
            .get_mut(&id)
            .ok_or(EnvelopeStoreError::NotFound(id))?;
        envelope.append_wrap(entry)?;
        Ok(())
    }

    async fn authored_by(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Vec<Uuid>, EnvelopeStoreError> {
        let inner = self.inner.read().map_err(lock_error)?;
        Ok(inner
            .order
            .iter()
            .filter(|id| {
                inner.envelopes.get(id).is_some_and(|e| {
                    e.sender_user_id() == Some(user_id) && e.sender_device_id() == Some(device_id)
                })
            })
            .copied()
            .collect())
    }
}
