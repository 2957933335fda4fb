//! Symmetric encryption using AES-256-GCM
//!
//! A `Secret` is a 256-bit key used for exactly one purpose: a content key sealing
//! a single item, a key-encryption key derived by ECDH, a handshake session key,
//! a one-time pairing secret, or a locally held team key. IVs are explicit and
//! travel next to the ciphertext rather than being prefixed to it, matching the
//! envelope wire shape.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Size of an AES-GCM IV in bytes (96 bits)
pub const IV_SIZE: usize = 12;
/// Size of an AES-256 key in bytes
pub const SECRET_SIZE: usize = 32;
/// Size of the AES-GCM authentication tag appended to every ciphertext
pub const TAG_SIZE: usize = 16;

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
    /// The AEAD tag did not verify: wrong key, wrong IV, or tampered data
    #[error("authentication failed")]
    Authentication,
    /// No usable entropy source. Fatal at the process boundary.
    #[error("cryptographic primitive unavailable: {0}")]
    CryptoUnavailable(String),
}

/// A 96-bit AES-GCM initialization vector
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Iv([u8; IV_SIZE]);

impl Iv {
    /// Draw a fresh random IV. Never reuse an IV under the same key.
    pub fn generate() -> Result<Self, SecretError> {
        let mut buff = [0u8; IV_SIZE];
        super::fill_random(&mut buff)?;
        Ok(Iv(buff))
    }

    pub fn bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }
}

impl From<[u8; IV_SIZE]> for Iv {
    fn from(bytes: [u8; IV_SIZE]) -> Self {
        Iv(bytes)
    }
}

impl AsRef<[u8]> for Iv {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<Vec<u8>> for Iv {
    type Error = SecretError;
    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        if bytes.len() != IV_SIZE {
            return Err(anyhow::anyhow!(
                "invalid iv size, expected {}, got {}",
                IV_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0u8; IV_SIZE];
        buff.copy_from_slice(&bytes);
        Ok(Iv(buff))
    }
}

/// A 256-bit symmetric key for AES-256-GCM
///
/// # Examples
///
/// ```ignore
/// let secret = Secret::generate()?;
/// let iv = Iv::generate()?;
///
/// let ciphertext = secret.encrypt(&iv, b"hello", None)?;
/// let recovered = secret.decrypt(&iv, &ciphertext, None)?;
/// assert_eq!(recovered, b"hello");
/// ```
#[derive(PartialEq, Eq, Clone)]
pub struct Secret([u8; SECRET_SIZE]);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    /// Generate a new random secret using the OS RNG
    pub fn generate() -> Result<Self, SecretError> {
        let mut buff = [0; SECRET_SIZE];
        super::fill_random(&mut buff)?;
        Ok(Self(buff))
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(anyhow::anyhow!(
                "invalid secret size, expected {}, got {}",
                SECRET_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    /// Parse a secret from unpadded base64url, the form pairing secrets and team
    /// keys take when a user copies them between devices.
    pub fn from_b64u(encoded: &str) -> Result<Self, SecretError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| anyhow::anyhow!("secret is not base64url: {}", e))?;
        Self::from_slice(&bytes)
    }

    pub fn to_b64u(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.bytes()))
    }

    /// Encrypt `data` under this key with the given IV.
    ///
    /// The output is `ciphertext || tag`. `aad` is authenticated but not encrypted.
    pub fn encrypt(&self, iv: &Iv, data: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>, SecretError> {
        let payload = Payload {
            msg: data,
            aad: aad.unwrap_or_default(),
        };
        self.cipher()
            .encrypt(Nonce::from_slice(iv.bytes()), payload)
            .map_err(|_| anyhow::anyhow!("encrypt error").into())
    }

    /// Decrypt `ciphertext || tag` produced by [`Secret::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns `SecretError::Authentication` if the tag does not verify, which
    /// covers a wrong key, a wrong IV, mismatched `aad`, and any bit flip in the data.
    pub fn decrypt(&self, iv: &Iv, data: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>, SecretError> {
        if data.len() < TAG_SIZE {
            return Err(anyhow::anyhow!("data too short for authentication tag").into());
        }
        let payload = Payload {
            msg: data,
            aad: aad.unwrap_or_default(),
        };
        self.cipher()
            .decrypt(Nonce::from_slice(iv.bytes()), payload)
            .map_err(|_| SecretError::Authentication)
    }

    /// Encrypt under a freshly drawn IV, returning both.
    pub fn seal(&self, data: &[u8], aad: Option<&[u8]>) -> Result<(Iv, Vec<u8>), SecretError> {
        let iv = Iv::generate()?;
        let ciphertext = self.encrypt(&iv, data, aad)?;
        Ok((iv, ciphertext))
    }
}
