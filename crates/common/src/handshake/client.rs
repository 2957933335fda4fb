use crate::crypto::{EcPublicJwk, PublicKey, SecretKey};

use super::session::CompletedHandshake;
use super::HandshakeError;

/// The client half of a handshake
///
/// Holds the ephemeral private key for the lifetime of one handshake. Drop it
/// once the payload has been opened.
#[derive(Debug)]
pub struct HandshakeClient {
    ephemeral: SecretKey,
}

impl HandshakeClient {
    pub fn new() -> Result<Self, HandshakeError> {
        Ok(Self {
            ephemeral: SecretKey::generate()?,
        })
    }

    pub fn public_key(&self) -> PublicKey {
        self.ephemeral.public()
    }

    pub fn public_jwk(&self) -> EcPublicJwk {
        EcPublicJwk::from(&self.public_key())
    }

    /// Derive the session key and open the sealed payload
    pub fn open(&self, completed: &CompletedHandshake) -> Result<Vec<u8>, HandshakeError> {
        let session_key = self.ephemeral.agree(&completed.server_public_key);
        Ok(session_key.decrypt(
            &completed.payload.iv,
            &completed.payload.ciphertext,
            None,
        )?)
    }
}
