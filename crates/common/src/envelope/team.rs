use std::collections::HashMap;

use crate::crypto::{Secret, SecretKey};

use super::engine::EnvelopeEngine;
use super::types::{ContentEnvelope, WrappedKeyEntry, META_TEAM_ID};
use super::EnvelopeError;

/// `recipient_device_id` used on wraps sealed directly under a team key
pub const TEAM_RECIPIENT_DEVICE: &str = "team";

/// Locally held symmetric team keys
///
/// This is a fallback unwrap path only. Anyone holding the team key can unwrap,
/// so it is strictly weaker than per-device wrapping. The keyring is client
/// state and is never sent to or managed by the directory.
#[derive(Debug, Clone, Default)]
pub struct TeamKeyring {
    keys: HashMap<String, Secret>,
}

impl TeamKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, team_id: impl Into<String>, key: Secret) {
        self.keys.insert(team_id.into(), key);
    }

    pub fn get(&self, team_id: &str) -> Option<&Secret> {
        self.keys.get(team_id)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl EnvelopeEngine {
    /// Seal `plaintext` for a whole team under its shared key.
    ///
    /// The single wrap entry holds the content key sealed directly under
    /// `team_key`. Only the team-key fallback can open it.
    pub fn seal_for_team(
        &self,
        plaintext: &[u8],
        team_id: &str,
        team_key: &Secret,
    ) -> Result<ContentEnvelope, EnvelopeError> {
        let content_key = Secret::generate()?;
        let (iv, ciphertext) = content_key.seal(plaintext, None)?;
        let (wrap_iv, wrapped_content_key) = team_key.seal(content_key.bytes(), None)?;
        // the entry shape requires an ephemeral key even though none is agreed with
        let placeholder = SecretKey::generate()?.public();

        let mut metadata = serde_json::Map::new();
        metadata.insert(META_TEAM_ID.to_string(), team_id.into());

        Ok(ContentEnvelope {
            ciphertext,
            iv,
            aad: None,
            wrapped_keys: vec![WrappedKeyEntry {
                recipient_user_id: team_id.to_string(),
                recipient_device_id: TEAM_RECIPIENT_DEVICE.to_string(),
                sender_ephemeral_public_key: placeholder,
                wrapped_content_key,
                wrap_iv,
            }],
            metadata,
        })
    }
}
