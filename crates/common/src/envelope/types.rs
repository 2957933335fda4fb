use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::base64::{Base64, UrlSafe};
use serde_with::formats::Unpadded;
use serde_with::serde_as;

use crate::crypto::{Iv, PublicKey, WrappedKey};

use super::EnvelopeError;

/// Metadata member recording the authoring user
pub const META_SENDER_USER_ID: &str = "senderUserId";
/// Metadata member recording the authoring device
pub const META_SENDER_DEVICE_ID: &str = "senderDeviceId";
/// Metadata member marking a team-addressed envelope
pub const META_TEAM_ID: &str = "teamId";

/// One content key, sealed for one device
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKeyEntry {
    pub recipient_user_id: String,
    pub recipient_device_id: String,
    #[serde(rename = "senderEphemeralPublicKeyJwk")]
    pub sender_ephemeral_public_key: PublicKey,
    #[serde(rename = "wrappedCekB64u")]
    #[serde_as(as = "Base64<UrlSafe, Unpadded>")]
    pub wrapped_content_key: Vec<u8>,
    #[serde(rename = "wrapIvB64u")]
    #[serde_as(as = "Base64<UrlSafe, Unpadded>")]
    pub wrap_iv: Iv,
}

impl WrappedKeyEntry {
    pub fn new(
        recipient_user_id: impl Into<String>,
        recipient_device_id: impl Into<String>,
        sender_ephemeral_public_key: PublicKey,
        wrapped: WrappedKey,
    ) -> Self {
        Self {
            recipient_user_id: recipient_user_id.into(),
            recipient_device_id: recipient_device_id.into(),
            sender_ephemeral_public_key,
            wrapped_content_key: wrapped.wrapped,
            wrap_iv: wrapped.iv,
        }
    }

    pub fn wrapped_key(&self) -> WrappedKey {
        WrappedKey {
            iv: self.wrap_iv,
            wrapped: self.wrapped_content_key.clone(),
        }
    }

    pub fn is_for(&self, user_id: &str, device_id: &str) -> bool {
        self.recipient_user_id == user_id && self.recipient_device_id == device_id
    }
}

/// A content item encrypted once and addressed to many devices
///
/// The ciphertext, IV, associated data, and metadata never change after
/// creation. The wrap list only grows, through [`ContentEnvelope::append_wrap`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEnvelope {
    #[serde(rename = "ciphertextB64u")]
    #[serde_as(as = "Base64<UrlSafe, Unpadded>")]
    pub(crate) ciphertext: Vec<u8>,
    #[serde(rename = "ivB64u")]
    #[serde_as(as = "Base64<UrlSafe, Unpadded>")]
    pub(crate) iv: Iv,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Base64<UrlSafe, Unpadded>>")]
    pub(crate) aad: Option<Vec<u8>>,
    pub(crate) wrapped_keys: Vec<WrappedKeyEntry>,
    #[serde(default)]
    pub(crate) metadata: Map<String, Value>,
}

impl ContentEnvelope {
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn iv(&self) -> &Iv {
        &self.iv
    }

    pub fn aad(&self) -> Option<&[u8]> {
        self.aad.as_deref()
    }

    pub fn wrapped_keys(&self) -> &[WrappedKeyEntry] {
        &self.wrapped_keys
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn sender_user_id(&self) -> Option<&str> {
        self.metadata_str(META_SENDER_USER_ID)
    }

    pub fn sender_device_id(&self) -> Option<&str> {
        self.metadata_str(META_SENDER_DEVICE_ID)
    }

    /// The team this envelope is addressed to, if any
    pub fn team_id(&self) -> Option<&str> {
        self.metadata_str(META_TEAM_ID)
    }

    pub fn has_wrap_for(&self, user_id: &str, device_id: &str) -> bool {
        self.wrapped_keys.iter().any(|e| e.is_for(user_id, device_id))
    }

    /// Append a wrap for an additional device
    ///
    /// Existing entries are never rewritten.
    ///
    /// # Errors
    ///
    /// `EnvelopeError::DuplicateRecipient` if the envelope already carries a wrap
    /// for the same `(recipient_user_id, recipient_device_id)`.
    pub fn append_wrap(&mut self, entry: WrappedKeyEntry) -> Result<(), EnvelopeError> {
        if self.has_wrap_for(&entry.recipient_user_id, &entry.recipient_device_id) {
            return Err(EnvelopeError::DuplicateRecipient {
                user_id: entry.recipient_user_id,
                device_id: entry.recipient_device_id,
            });
        }
        self.wrapped_keys.push(entry);
        Ok(())
    }
}
