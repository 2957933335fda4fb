//! Multi-recipient envelope encryption
//!
//! A content item is sealed once under a fresh content key, and that content key
//! is wrapped separately for every recipient device:
//!
//! ```text
//! ContentEnvelope
//! ├── ciphertext = AES-256-GCM(CK, iv, plaintext, aad)
//! └── wrapped_keys
//!     ├── { alice/laptop, epk, AES-256-GCM(ECDH(esk, alice/laptop), CK) }
//!     ├── { alice/phone,  epk, AES-256-GCM(ECDH(esk, alice/phone),  CK) }
//!     └── { bob/desktop,  epk, AES-256-GCM(ECDH(esk, bob/desktop),  CK) }
//! ```
//!
//! The sender's own device always receives a wrap. That self-wrap is what lets
//! the sender later backfill the envelope for a newly paired device.

mod engine;
mod store;
mod strategy;
mod team;
mod types;

pub use engine::{EncryptOptions, EnvelopeEngine};
pub use store::{DynEnvelopeStore, EnvelopeStore, EnvelopeStoreError, MemoryEnvelopeStore};
pub use strategy::UnwrapStrategy;
pub use team::{TeamKeyring, TEAM_RECIPIENT_DEVICE};
pub use types::{
    ContentEnvelope, WrappedKeyEntry, META_SENDER_DEVICE_ID, META_SENDER_USER_ID, META_TEAM_ID,
};

use crate::crypto::{KeyError, SecretError, WrapError};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Encryption was attempted with no recipients
    #[error("no recipient keys to encrypt for")]
    MissingRecipientKeys,
    /// Neither a device wrap nor the team fallback recovered the content.
    /// Usually means the envelope is simply not addressed to this device.
    #[error("envelope could not be decrypted by this device")]
    DecryptionFailed,
    #[error("envelope already has a wrap for {user_id}/{device_id}")]
    DuplicateRecipient { user_id: String, device_id: String },
    /// The envelope carries no usable wrap for the given authoring device
    #[error("no self-wrap for device {0}")]
    NoSelfWrap(String),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("wrap error: {0}")]
    Wrap(#[from] WrapError),
}
