//! JSON Web Key representation of P-256 public keys
//!
//! Only public EC material is ever represented here. Keys are validated when
//! converted into a [`PublicKey`], so a malformed or off-curve JWK fails at the
//! boundary with a typed error instead of deep inside an ECDH call.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::keys::{KeyError, PublicKey};

pub const KTY_EC: &str = "EC";
pub const CRV_P256: &str = "P-256";
const COORDINATE_SIZE: usize = 32;

/// An EC public key in JWK form (RFC 7517 / RFC 7518 §6.2.1)
///
/// Unknown members (`ext`, `key_ops`, ...) emitted by browser key exports are
/// accepted and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcPublicJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
}

impl EcPublicJwk {
    fn coordinate(name: &str, value: &str) -> Result<Vec<u8>, KeyError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|e| KeyError::InvalidJwk(format!("{} is not base64url: {}", name, e)))?;
        if bytes.len() != COORDINATE_SIZE {
            return Err(KeyError::InvalidJwk(format!(
                "{} must be {} bytes, got {}",
                name,
                COORDINATE_SIZE,
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

impl From<&PublicKey> for EcPublicJwk {
    fn from(key: &PublicKey) -> Self {
        // uncompressed SEC1: 0x04 || x || y
        let bytes = key.to_bytes();
        EcPublicJwk {
            kty: KTY_EC.to_string(),
            crv: CRV_P256.to_string(),
            x: URL_SAFE_NO_PAD.encode(&bytes[1..1 + COORDINATE_SIZE]),
            y: URL_SAFE_NO_PAD.encode(&bytes[1 + COORDINATE_SIZE..]),
        }
    }
}

impl TryFrom<&EcPublicJwk> for PublicKey {
    type Error = KeyError;

    fn try_from(jwk: &EcPublicJwk) -> Result<Self, Self::Error> {
        if jwk.kty != KTY_EC {
            return Err(KeyError::InvalidJwk(format!(
                "unsupported kty {:?}, expected {:?}",
                jwk.kty, KTY_EC
            )));
        }
        if jwk.crv != CRV_P256 {
            return Err(KeyError::InvalidJwk(format!(
                "unsupported crv {:?}, expected {:?}",
                jwk.crv, CRV_P256
            )));
        }
        let x = EcPublicJwk::coordinate("x", &jwk.x)?;
        let y = EcPublicJwk::coordinate("y", &jwk.y)?;

        let mut sec1 = Vec::with_capacity(1 + 2 * COORDINATE_SIZE);
        sec1.push(0x04);
        sec1.extend_from_slice(&x);
        sec1.extend_from_slice(&y);
        PublicKey::try_from(sec1.as_slice())
            .map_err(|_| KeyError::InvalidJwk("point is not on the P-256 curve".to_string()))
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        EcPublicJwk::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let jwk = EcPublicJwk::deserialize(deserializer)?;
        PublicKey::try_from(&jwk).map_err(serde::de::Error::custom)
    }
}
