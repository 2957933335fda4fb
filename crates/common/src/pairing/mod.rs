//! Companion device pairing and envelope backfill
//!
//! Pairing hands a companion device the primary device's public key through the
//! relay without the relay ever being able to read or forge it:
//!
//! 1. The primary draws a one-time [`PairingSecret`], seals its public key under
//!    it, and parks the sealed ticket on the relay under a random token.
//! 2. Token and secret reach the companion over two separate out-of-band
//!    channels.
//! 3. The companion claims the ticket (single use), opens it with the secret,
//!    generates its own keypair and registers it in the key directory.
//! 4. The primary backfills: for every envelope it authored, it recovers the
//!    content key through its own self-wrap and appends a wrap for the
//!    companion.
//!
//! The primary's private key is never exported or reconstructed.

mod backfill;
mod service;
mod ticket;

pub use backfill::{BackfillReport, BackfillSkip};
pub use service::{PairingInvite, PairingService, DEFAULT_PAIRING_TTL, MAX_PAIRING_TTL};
pub use ticket::{open_primary_key, seal_primary_key, PairingSecret, PairingTicket, SealedTicket};

use std::time::Duration;

use crate::crypto::{KeyError, SecretError};
use crate::directory::DirectoryError;
use crate::envelope::{EnvelopeError, EnvelopeStoreError};
use crate::session_store::SessionStoreError;

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("pairing ticket not found")]
    NotFound,
    #[error("pairing ticket expired")]
    ExpiredSession,
    #[error("pairing ttl must be between 1ms and {max:?}, got {ttl:?}")]
    InvalidTtl { ttl: Duration, max: Duration },
    /// The pairing secret does not open the ticket
    #[error("pairing secret does not match ticket")]
    InvalidSecret,
    #[error("session store error: {0}")]
    Store(#[from] SessionStoreError),
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("envelope store error: {0}")]
    EnvelopeStore(#[from] EnvelopeStoreError),
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("malformed ticket contents: {0}")]
    Serialization(#[from] serde_json::Error),
}
