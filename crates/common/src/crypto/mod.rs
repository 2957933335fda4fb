//! Cryptographic primitives for keyrelay
//!
//! Everything in the protocol is built from two primitives:
//!
//! - **Key agreement**: ECDH over NIST P-256 (`SecretKey` / `PublicKey`)
//! - **Authenticated encryption**: AES-256-GCM with an explicit 96-bit IV (`Secret`)
//!
//! # Security Model
//!
//! ## Device keys
//! Every registered device owns a P-256 encryption keypair. The private half never
//! leaves the device; only the public half crosses the wire, as an `EcPublicJwk`.
//!
//! ## Content keys
//! Every content item is sealed under its own freshly generated `Secret`. Content
//! keys are never reused across items.
//!
//! ## Key wrapping
//! To address a content key to a device:
//! 1. Take an ephemeral P-256 keypair (one per envelope)
//! 2. Perform ECDH between the ephemeral private key and the device public key
//! 3. Use the raw shared x-coordinate as an AES-256-GCM key-encryption key
//! 4. Seal the content key under that KEK with a fresh IV
//!
//! The device recovers the content key by performing ECDH between its own private
//! key and the ephemeral public key carried alongside the wrap.

mod jwk;
mod keys;
mod secret;
mod wrap;

pub use jwk::EcPublicJwk;
pub use keys::{KeyError, PublicKey, SecretKey, Signature, PRIVATE_KEY_SIZE};
pub use secret::{Iv, Secret, SecretError, IV_SIZE, SECRET_SIZE, TAG_SIZE};
pub use wrap::{unwrap_key, wrap_key, WrapError, WrappedKey};
pub(crate) use wrap::unwrap_with_kek;

/// Fill `buf` from the operating system RNG.
///
/// Fails with `SecretError::CryptoUnavailable` when no entropy source is usable.
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<(), SecretError> {
    getrandom::getrandom(buf).map_err(|e| SecretError::CryptoUnavailable(e.to_string()))
}
