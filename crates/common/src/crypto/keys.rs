use std::fmt;

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;

use super::secret::{Secret, SecretError, SECRET_SIZE};

pub use p256::ecdsa::Signature;

/// Size of a P-256 private scalar in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("invalid JWK: {0}")]
    InvalidJwk(String),
    #[error(transparent)]
    Secret(#[from] SecretError),
}

/// Public half of a P-256 device or ephemeral keypair
///
/// This is what the key directory stores and what travels on the wire (as an
/// [`EcPublicJwk`](super::EcPublicJwk)). It is used both as an ECDH peer key and
/// as an ECDSA verifying key for the optional device signing keypair.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl From<p256::PublicKey> for PublicKey {
    fn from(key: p256::PublicKey) -> Self {
        PublicKey(key)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let key = p256::PublicKey::from_sec1_bytes(bytes)
            .map_err(|_| anyhow::anyhow!("invalid SEC1 encoded P-256 point"))?;
        Ok(PublicKey(key))
    }
}

impl PublicKey {
    /// Parse a public key from a hex encoded SEC1 point
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = hex::decode(hex).map_err(|_| anyhow::anyhow!("public key hex decode error"))?;
        Self::try_from(bytes.as_slice())
    }

    /// Uncompressed SEC1 encoding (`0x04 || x || y`)
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Short, stable identifier for log lines. Not a security binding.
    pub fn fingerprint(&self) -> String {
        let bytes = self.to_bytes();
        hex::encode(&bytes[1..9])
    }

    pub(crate) fn inner(&self) -> &p256::PublicKey {
        &self.0
    }

    /// Verify an ECDSA P-256 signature over `msg`.
    pub fn verify(&self, msg: &[u8], signature: &Signature) -> Result<(), KeyError> {
        VerifyingKey::from(&self.0)
            .verify(msg, signature)
            .map_err(|_| anyhow::anyhow!("signature verification failed").into())
    }
}

/// Private half of a P-256 keypair
///
/// Device secret keys never leave the device that generated them. Ephemeral
/// secret keys live only for the duration of a single envelope, handshake, or
/// backfill wrap and are dropped afterwards.
#[derive(Clone)]
pub struct SecretKey(p256::SecretKey);

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(<redacted> public={})", self.public().fingerprint())
    }
}

impl SecretKey {
    /// Generate a new random keypair from the OS RNG
    pub fn generate() -> Result<Self, KeyError> {
        loop {
            let mut bytes = [0u8; PRIVATE_KEY_SIZE];
            super::fill_random(&mut bytes)?;
            // scalars of zero or >= the group order are rejected, draw again
            if let Ok(key) = p256::SecretKey::from_slice(&bytes) {
                return Ok(SecretKey(key));
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PRIVATE_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid private key size, expected {}, got {}",
                PRIVATE_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        let key = p256::SecretKey::from_slice(bytes)
            .map_err(|_| anyhow::anyhow!("private key is not a valid P-256 scalar"))?;
        Ok(SecretKey(key))
    }

    /// Parse a secret key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PRIVATE_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("private key hex decode error"))?;
        Self::from_bytes(&buff)
    }

    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        let mut out = [0u8; PRIVATE_KEY_SIZE];
        out.copy_from_slice(&self.0.to_bytes());
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }

    /// ECDH with `peer`, returning the raw shared x-coordinate as an AES-256-GCM key.
    ///
    /// Both sides of an exchange arrive at the same `Secret`, which is only ever
    /// used as a key-encryption key.
    pub fn agree(&self, peer: &PublicKey) -> Secret {
        let shared = p256::ecdh::diffie_hellman(self.0.to_nonzero_scalar(), peer.inner().as_affine());
        let mut bytes = [0u8; SECRET_SIZE];
        bytes.copy_from_slice(shared.raw_secret_bytes());
        Secret::from(bytes)
    }

    /// Sign a message with ECDSA P-256 (SHA-256).
    pub fn sign(&self, msg: &[u8]) -> Signature {
        SigningKey::from(&self.0).sign(msg)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_keypair_hex_roundtrip() {
        let private_key = SecretKey::generate().unwrap();
        let public_key = private_key.public();

        let recovered_private = SecretKey::from_hex(&private_key.to_hex()).unwrap();
        assert_eq!(private_key.to_bytes(), recovered_private.to_bytes());

        let recovered_public = PublicKey::from_hex(&public_key.to_hex()).unwrap();
        assert_eq!(public_key, recovered_public);
    }

    #[test]
    fn test_agreement_is_symmetric() {
        let alice = SecretKey::generate().unwrap();
        let bob = SecretKey::generate().unwrap();

        let ab = alice.agree(&bob.public());
        let ba = bob.agree(&alice.public());
        assert_eq!(ab, ba);

        let carol = SecretKey::generate().unwrap();
        assert_ne!(ab, alice.agree(&carol.public()));
    }

    #[test]
    fn test_sign_and_verify() {
        let secret_key = SecretKey::generate().unwrap();
        let public_key = secret_key.public();
        let message = b"register device laptop-1";

        let signature = secret_key.sign(message);
        assert!(public_key.verify(message, &signature).is_ok());
        assert!(public_key.verify(b"register device laptop-2", &signature).is_err());

        let other_key = SecretKey::generate().unwrap().public();
        assert!(other_key.verify(message, &signature).is_err());
    }

    #[test]
    fn test_rejects_invalid_points() {
        assert!(PublicKey::try_from([4u8; 65].as_slice()).is_err());
        assert!(PublicKey::try_from([0u8; 3].as_slice()).is_err());
        assert!(SecretKey::from_bytes(&[0u8; PRIVATE_KEY_SIZE]).is_err());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let key = SecretKey::generate().unwrap();
        let debug = format!("{:?}", key);
        assert!(debug.contains("redacted"));
        assert!(!debug.contains(&key.to_hex()));
    }
}
