//! Local device identity
//!
//! A `DeviceIdentity` is created the first time a client runs on a device and
//! persisted by that client. Its private halves are never transmitted; the
//! directory only ever sees [`DeviceIdentity::public_record`].

use crate::crypto::{KeyError, PublicKey, SecretKey};
use crate::directory::{RecipientKeyRecord, DEFAULT_ALGORITHM};

#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    device_id: String,
    encryption_key: SecretKey,
    signing_key: Option<SecretKey>,
    algorithm: String,
    is_primary: bool,
}

impl DeviceIdentity {
    /// Generate a fresh encryption keypair for `device_id`
    pub fn generate(device_id: impl Into<String>, is_primary: bool) -> Result<Self, KeyError> {
        Ok(Self {
            device_id: device_id.into(),
            encryption_key: SecretKey::generate()?,
            signing_key: None,
            algorithm: DEFAULT_ALGORITHM.to_string(),
            is_primary,
        })
    }

    /// Restore a persisted identity
    pub fn from_parts(
        device_id: impl Into<String>,
        encryption_key: SecretKey,
        signing_key: Option<SecretKey>,
        is_primary: bool,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            encryption_key,
            signing_key,
            algorithm: DEFAULT_ALGORITHM.to_string(),
            is_primary,
        }
    }

    /// Attach a freshly generated ECDSA signing keypair
    pub fn with_signing_key(mut self) -> Result<Self, KeyError> {
        self.signing_key = Some(SecretKey::generate()?);
        Ok(self)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn encryption_key(&self) -> &SecretKey {
        &self.encryption_key
    }

    pub fn encryption_public_key(&self) -> PublicKey {
        self.encryption_key.public()
    }

    pub fn signing_key(&self) -> Option<&SecretKey> {
        self.signing_key.as_ref()
    }

    /// The directory projection of this device under `user_id`
    pub fn public_record(&self, user_id: &str) -> RecipientKeyRecord {
        let mut record = RecipientKeyRecord::new(user_id, &self.device_id, self.encryption_public_key())
            .with_algorithm(&self.algorithm);
        record.signing_public_key = self.signing_key.as_ref().map(|k| k.public());
        record
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_public_record_only_has_public_keys() {
        let identity = DeviceIdentity::generate("laptop", true)
            .unwrap()
            .with_signing_key()
            .unwrap();
        let record = identity.public_record("alice");

        assert_eq!(record.user_id, "alice");
        assert_eq!(record.device_id, "laptop");
        assert_eq!(record.encryption_public_key, identity.encryption_public_key());
        assert_eq!(
            record.signing_public_key,
            identity.signing_key().map(|k| k.public())
        );

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains(&identity.encryption_key().to_hex()));
        assert!(json.contains("encryptionPublicKeyJwk"));
        assert!(json.contains("signingPublicKeyJwk"));
    }
}
