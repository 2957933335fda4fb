use crate::crypto::{unwrap_key, Secret, SecretKey};

use super::team::TeamKeyring;
use super::types::{ContentEnvelope, WrappedKeyEntry};
use super::EnvelopeError;

/// One way of recovering an envelope's content key
///
/// Decryption builds an ordered plan of strategies and stops at the first that
/// succeeds. Each attempt is independent: a failed attempt leaves nothing behind
/// that could influence the next.
#[derive(Debug, Clone, Copy)]
pub enum UnwrapStrategy<'a> {
    /// A wrap whose declared recipient device is the local device
    AddressedWrap(&'a WrappedKeyEntry),
    /// Any other wrap. Tried in case the recipient metadata is wrong.
    OtherWrap(&'a WrappedKeyEntry),
    /// The first wrap, opened with a locally held team key
    TeamKey {
        team_id: &'a str,
        entry: &'a WrappedKeyEntry,
    },
}

impl<'a> UnwrapStrategy<'a> {
    /// Ordered candidates for `local_device_id`
    ///
    /// Addressed wraps first, then every other wrap, then the team key fallback
    /// if the envelope declares a team and the keyring holds its key.
    pub fn plan(
        envelope: &'a ContentEnvelope,
        local_device_id: &str,
        team_keys: Option<&TeamKeyring>,
    ) -> Vec<UnwrapStrategy<'a>> {
        let (addressed, other): (Vec<_>, Vec<_>) = envelope
            .wrapped_keys()
            .iter()
            .partition(|entry| entry.recipient_device_id == local_device_id);

        let mut plan: Vec<UnwrapStrategy<'a>> = addressed
            .into_iter()
            .map(UnwrapStrategy::AddressedWrap)
            .chain(other.into_iter().map(UnwrapStrategy::OtherWrap))
            .collect();

        let team_fallback = envelope.team_id().zip(envelope.wrapped_keys().first());
        if let (Some((team_id, entry)), Some(keyring)) = (team_fallback, team_keys) {
            if keyring.get(team_id).is_some() {
                plan.push(UnwrapStrategy::TeamKey { team_id, entry });
            }
        }
        plan
    }

    pub fn entry(&self) -> &'a WrappedKeyEntry {
        match *self {
            UnwrapStrategy::AddressedWrap(entry) | UnwrapStrategy::OtherWrap(entry) => entry,
            UnwrapStrategy::TeamKey { entry, .. } => entry,
        }
    }

    /// Try to recover the content key with this strategy alone
    pub fn content_key(
        &self,
        local_key: &SecretKey,
        team_keys: Option<&TeamKeyring>,
    ) -> Result<Secret, EnvelopeError> {
        match self {
            UnwrapStrategy::AddressedWrap(entry) | UnwrapStrategy::OtherWrap(entry) => Ok(
                unwrap_key(&entry.wrapped_key(), local_key, &entry.sender_ephemeral_public_key)?,
            ),
            UnwrapStrategy::TeamKey { team_id, entry } => {
                let team_key = team_keys
                    .and_then(|keyring| keyring.get(team_id))
                    .ok_or(EnvelopeError::DecryptionFailed)?;
                Ok(crate::crypto::unwrap_with_kek(&entry.wrapped_key(), team_key)?)
            }
        }
    }
}
