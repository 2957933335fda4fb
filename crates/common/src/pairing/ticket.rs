use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::base64::{Base64, UrlSafe};
use serde_with::formats::Unpadded;
use serde_with::serde_as;

use crate::crypto::{Iv, PublicKey, Secret, SecretError};

use super::PairingError;

/// One-time symmetric secret shared out-of-band between primary and companion
///
/// Never sent to the relay.
#[derive(Clone, PartialEq)]
pub struct PairingSecret(Secret);

impl PairingSecret {
    pub fn generate() -> Result<Self, SecretError> {
        Ok(Self(Secret::generate()?))
    }

    /// Parse the out-of-band text form
    pub fn from_b64u(encoded: &str) -> Result<Self, SecretError> {
        Ok(Self(Secret::from_b64u(encoded)?))
    }

    pub fn to_b64u(&self) -> String {
        self.0.to_b64u()
    }
}

impl fmt::Debug for PairingSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PairingSecret(<redacted>)")
    }
}

/// The primary public key, sealed under a pairing secret
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedTicket {
    #[serde(rename = "ivB64u")]
    #[serde_as(as = "Base64<UrlSafe, Unpadded>")]
    pub iv: Iv,
    #[serde(rename = "ciphertextB64u")]
    #[serde_as(as = "Base64<UrlSafe, Unpadded>")]
    pub ciphertext: Vec<u8>,
}

/// Relay-side record of a parked ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingTicket {
    pub token: String,
    pub device_id: String,
    #[serde(flatten)]
    pub sealed: SealedTicket,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PairingTicket {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Serialize, Deserialize)]
struct TicketContents {
    #[serde(rename = "primaryPublicKeyJwk")]
    primary_public_key: PublicKey,
}

pub fn seal_primary_key(
    secret: &PairingSecret,
    primary_public_key: &PublicKey,
) -> Result<SealedTicket, PairingError> {
    let contents = serde_json::to_vec(&TicketContents {
        primary_public_key: *primary_public_key,
    })?;
    let (iv, ciphertext) = secret.0.seal(&contents, None)?;
    Ok(SealedTicket { iv, ciphertext })
}

/// Open a sealed ticket, validating the enclosed key
///
/// # Errors
///
/// `PairingError::InvalidSecret` if `secret` is not the one the ticket was
/// sealed under, or the ticket was altered in transit.
pub fn open_primary_key(
    secret: &PairingSecret,
    sealed: &SealedTicket,
) -> Result<PublicKey, PairingError> {
    let contents = secret
        .0
        .decrypt(&sealed.iv, &sealed.ciphertext, None)
        .map_err(|e| match e {
            SecretError::Authentication => PairingError::InvalidSecret,
            other => PairingError::Secret(other),
        })?;
    let contents: TicketContents = serde_json::from_slice(&contents)?;
    Ok(contents.primary_public_key)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::SecretKey;

    #[test]
    fn test_seal_open() {
        let primary = SecretKey::generate().unwrap().public();
        let secret = PairingSecret::generate().unwrap();

        let sealed = seal_primary_key(&secret, &primary).unwrap();
        assert_eq!(open_primary_key(&secret, &sealed).unwrap(), primary);

        let restored = PairingSecret::from_b64u(&secret.to_b64u()).unwrap();
        assert_eq!(open_primary_key(&restored, &sealed).unwrap(), primary);
    }

    #[test]
    fn test_wrong_secret() {
        let primary = SecretKey::generate().unwrap().public();
        let sealed = seal_primary_key(&PairingSecret::generate().unwrap(), &primary).unwrap();

        let result = open_primary_key(&PairingSecret::generate().unwrap(), &sealed);
        assert!(matches!(result, Err(PairingError::InvalidSecret)));
    }

    #[test]
    fn test_secret_debug_redacted() {
        let secret = PairingSecret::generate().unwrap();
        assert!(!format!("{:?}", secret).contains(&secret.to_b64u()));
    }

    #[test]
    fn test_ticket_wire_shape() {
        let primary = SecretKey::generate().unwrap().public();
        let sealed = seal_primary_key(&PairingSecret::generate().unwrap(), &primary).unwrap();
        let json = serde_json::to_value(&sealed).unwrap();
        assert!(json["ivB64u"].is_string());
        assert!(json["ciphertextB64u"].is_string());
    }
}
