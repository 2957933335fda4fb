//! Per-device content key wrapping using ECDH + AES-256-GCM
//!
//! # Protocol Overview
//!
//! To wrap a content key for a device:
//! 1. **Agree**: ECDH(ephemeral private, device public) yields the key-encryption key
//! 2. **Seal**: AES-256-GCM encrypts the 32-byte content key under the KEK with a fresh IV
//!
//! The device unwraps by computing ECDH(device private, ephemeral public), which
//! arrives at the same KEK.
//!
//! One ephemeral keypair may wrap for every device of a single envelope, since each
//! device's static key produces a distinct KEK. It must not be reused across envelopes.

use super::keys::{PublicKey, SecretKey};
use super::secret::{Iv, Secret, SecretError, SECRET_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum WrapError {
    #[error("wrap error: {0}")]
    Secret(#[from] SecretError),
    #[error("unwrapped content key has wrong size {0}")]
    InvalidContentKey(usize),
}

/// A content key sealed for a single device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub iv: Iv,
    pub wrapped: Vec<u8>,
}

/// Wrap `content_key` so that only the holder of `recipient`'s private key can
/// recover it.
pub fn wrap_key(
    content_key: &Secret,
    ephemeral: &SecretKey,
    recipient: &PublicKey,
) -> Result<WrappedKey, WrapError> {
    let kek = ephemeral.agree(recipient);
    let (iv, wrapped) = kek.seal(content_key.bytes(), None)?;
    Ok(WrappedKey { iv, wrapped })
}

/// Recover a content key wrapped with [`wrap_key`].
///
/// # Errors
///
/// Fails with `SecretError::Authentication` when the wrap was made for a
/// different device or was tampered with.
pub fn unwrap_key(
    wrapped: &WrappedKey,
    local: &SecretKey,
    ephemeral_public: &PublicKey,
) -> Result<Secret, WrapError> {
    let kek = local.agree(ephemeral_public);
    unwrap_with_kek(wrapped, &kek)
}

/// Recover a content key sealed directly under a symmetric key-encryption key.
pub(crate) fn unwrap_with_kek(wrapped: &WrappedKey, kek: &Secret) -> Result<Secret, WrapError> {
    let bytes = kek.decrypt(&wrapped.iv, &wrapped.wrapped, None)?;
    if bytes.len() != SECRET_SIZE {
        return Err(WrapError::InvalidContentKey(bytes.len()));
    }
    Ok(Secret::from_slice(&bytes)?)
}
