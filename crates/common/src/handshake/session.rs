use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::base64::{Base64, UrlSafe};
use serde_with::formats::Unpadded;
use serde_with::serde_as;
use uuid::Uuid;

use crate::crypto::{Iv, PublicKey};

/// Server-side record of one handshake
///
/// Never holds the server's ephemeral private key: only the public half and
/// the sealed payload survive `complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeSession {
    pub id: Uuid,
    #[serde(rename = "clientPublicKeyJwk")]
    pub client_public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<CompletedHandshake>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl HandshakeSession {
    /// Live while `now <= expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeInit {
    pub handshake_id: Uuid,
    pub expires_in_ms: u64,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePayload {
    #[serde(rename = "ivB64u")]
    #[serde_as(as = "Base64<UrlSafe, Unpadded>")]
    pub iv: Iv,
    #[serde(rename = "ciphertextB64u")]
    #[serde_as(as = "Base64<UrlSafe, Unpadded>")]
    pub ciphertext: Vec<u8>,
}

/// What the client needs to open the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedHandshake {
    #[serde(rename = "serverPublicKeyJwk")]
    pub server_public_key: PublicKey,
    pub payload: HandshakePayload,
}
