/**
 * Cryptographic types and operations.
 *  - P-256 device and ephemeral keys, with JWK encoding
 *  - AES-256-GCM secrets
 *  - ECDH content-key wrapping
 */
pub mod crypto;
/**
 * Per-user registry of device public keys.
 *  Enforces the device cap and broadcasts
 *  changes to recipient caches.
 */
pub mod directory;
/**
 * Multi-recipient envelope encryption.
 *  One ciphertext per item, one wrapped content
 *  key per recipient device.
 */
pub mod envelope;
/**
 * One-shot ephemeral key exchange used to hand
 *  a secret payload to a client that only ever
 *  sent a public key.
 */
pub mod handshake;
/**
 * Local device identity: keypairs that never
 *  leave the device.
 */
pub mod identity;
/**
 * Companion device pairing and backfill of
 *  previously authored envelopes.
 */
pub mod pairing;
/**
 * Ephemeral key/value storage with lazy TTL
 *  expiry, shared by handshakes and pairing.
 */
pub mod session_store;

pub mod prelude {
    pub use crate::crypto::{EcPublicJwk, PublicKey, Secret, SecretKey};
    pub use crate::directory::{
        DirectoryConfig, DynKeyDirectory, KeyDirectory, MemoryKeyDirectory, RecipientKeyRecord,
    };
    pub use crate::envelope::{
        ContentEnvelope, DynEnvelopeStore, EnvelopeEngine, EnvelopeError, EnvelopeStore,
        MemoryEnvelopeStore, WrappedKeyEntry,
    };
    pub use crate::handshake::{HandshakeClient, HandshakeError, HandshakeService};
    pub use crate::identity::DeviceIdentity;
    pub use crate::pairing::{PairingError, PairingSecret, PairingService};
    pub use crate::session_store::{
        Clock, DynClock, DynSessionStore, MemorySessionStore, SessionStore, SystemClock,
    };
}
