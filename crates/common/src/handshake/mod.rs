//! One-shot ephemeral key exchange for delivering secrets to a client
//!
//! The client only ever sends an ephemeral public key. Once the identity
//! exchange finishes, the server seals the payload (typically freshly issued
//! bearer tokens) under `ECDH(server ephemeral, client ephemeral)` and the
//! client polls for it:
//!
//! ```text
//! client                           relay                         identity adapter
//!   |-- init(client epk) ------------>|                                 |
//!   |<-------- handshake id, ttl -----|                                 |
//!   |                                 |<------ complete(id, payload) ---|
//!   |-- retrieve(id) ---------------->|                                 |
//!   |<-- server epk, iv, ciphertext --|                                 |
//! ```
//!
//! Sessions move `Initiated -> Completed -> Retrieved* -> Expired`. Retrieval
//! does not consume the session: the sealed payload can be polled until the TTL
//! elapses. The server's ephemeral private key is dropped as soon as `complete`
//! returns.

mod client;
mod service;
mod session;

pub use client::HandshakeClient;
pub use service::{HandshakeService, DEFAULT_HANDSHAKE_TTL};
pub use session::{CompletedHandshake, HandshakeInit, HandshakePayload, HandshakeSession};

use uuid::Uuid;

use crate::crypto::{KeyError, SecretError};
use crate::session_store::SessionStoreError;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// `complete` was called for a session id the store does not know
    #[error("invalid handshake: {0}")]
    InvalidHandshake(Uuid),
    #[error("handshake already completed: {0}")]
    AlreadyCompleted(Uuid),
    #[error("handshake not found: {0}")]
    NotFound(Uuid),
    #[error("handshake expired: {0}")]
    ExpiredSession(Uuid),
    #[error("session store error: {0}")]
    Store(#[from] SessionStoreError),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}
