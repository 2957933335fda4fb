use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::crypto::{wrap_key, Secret, SecretKey};
use crate::directory::RecipientKeyRecord;
use crate::identity::DeviceIdentity;

use super::strategy::UnwrapStrategy;
use super::team::TeamKeyring;
use super::types::{
    ContentEnvelope, WrappedKeyEntry, META_SENDER_DEVICE_ID, META_SENDER_USER_ID, META_TEAM_ID,
};
use super::EnvelopeError;

/// Optional inputs to [`EnvelopeEngine::encrypt_with`]
#[derive(Debug, Clone, Default)]
pub struct EncryptOptions {
    /// Authenticated but unencrypted data bound to the ciphertext
    pub aad: Option<Vec<u8>>,
    /// Declare the envelope as addressed to a team
    pub team_id: Option<String>,
    /// Free-form metadata carried in the clear
    pub metadata: Map<String, Value>,
}

/// Seals and opens [`ContentEnvelope`]s
///
/// The engine holds no mutable cryptographic state, so one instance can serve
/// any number of concurrent encrypt and decrypt calls.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeEngine {
    team_keys: Option<TeamKeyring>,
}

impl EnvelopeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the team key fallback for team-addressed envelopes
    pub fn with_team_keys(mut self, keyring: TeamKeyring) -> Self {
        self.team_keys = Some(keyring);
        self
    }

    pub fn encrypt(
        &self,
        plaintext: &[u8],
        recipients: &[RecipientKeyRecord],
        sender_user_id: &str,
        sender: &DeviceIdentity,
    ) -> Result<ContentEnvelope, EnvelopeError> {
        self.encrypt_with(
            plaintext,
            recipients,
            sender_user_id,
            sender,
            EncryptOptions::default(),
        )
    }

    /// Seal `plaintext` under a fresh content key and wrap that key for every
    /// recipient device plus the sender's own device.
    ///
    /// The sender's self-wrap always uses the sender's local public key, even if
    /// `recipients` carries a (possibly stale) directory record for the same
    /// device. Duplicate recipient records are collapsed.
    ///
    /// # Errors
    ///
    /// `EnvelopeError::MissingRecipientKeys` if `recipients` is empty.
    pub fn encrypt_with(
        &self,
        plaintext: &[u8],
        recipients: &[RecipientKeyRecord],
        sender_user_id: &str,
        sender: &DeviceIdentity,
        options: EncryptOptions,
    ) -> Result<ContentEnvelope, EnvelopeError> {
        if recipients.is_empty() {
            return Err(EnvelopeError::MissingRecipientKeys);
        }

        let content_key = Secret::generate()?;
        let (iv, ciphertext) = content_key.seal(plaintext, options.aad.as_deref())?;

        // one ephemeral keypair per envelope, dropped when this call returns
        let ephemeral = SecretKey::generate()?;
        let ephemeral_public = ephemeral.public();

        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        seen.insert((sender_user_id, sender.device_id()));

        let mut wrapped_keys = Vec::with_capacity(recipients.len() + 1);
        wrapped_keys.push(WrappedKeyEntry::new(
            sender_user_id,
            sender.device_id(),
            ephemeral_public,
            wrap_key(&content_key, &ephemeral, &sender.encryption_public_key())?,
        ));
        for recipient in recipients {
            if !seen.insert((recipient.user_id.as_str(), recipient.device_id.as_str())) {
                continue;
            }
            wrapped_keys.push(WrappedKeyEntry::new(
                &recipient.user_id,
                &recipient.device_id,
                ephemeral_public,
                wrap_key(&content_key, &ephemeral, &recipient.encryption_public_key)?,
            ));
        }

        let mut metadata = options.metadata;
        metadata.insert(META_SENDER_USER_ID.to_string(), sender_user_id.into());
        metadata.insert(META_SENDER_DEVICE_ID.to_string(), sender.device_id().into());
        if let Some(team_id) = options.team_id {
            metadata.insert(META_TEAM_ID.to_string(), team_id.into());
        }

        tracing::debug!(
            sender_user_id,
            sender_device_id = sender.device_id(),
            wraps = wrapped_keys.len(),
            "sealed content envelope"
        );

        Ok(ContentEnvelope {
            ciphertext,
            iv,
            aad: options.aad,
            wrapped_keys,
            metadata,
        })
    }

    /// The ordered unwrap plan [`EnvelopeEngine::decrypt`] will evaluate
    pub fn unwrap_plan<'a>(
        &self,
        envelope: &'a ContentEnvelope,
        local_device_id: &str,
    ) -> Vec<UnwrapStrategy<'a>> {
        UnwrapStrategy::plan(envelope, local_device_id, self.team_keys.as_ref())
    }

    /// Recover the plaintext with the local device's private key
    ///
    /// Every candidate in the unwrap plan is tried in order; the first that
    /// yields a content key which also opens the ciphertext wins. A failure of
    /// any single candidate is swallowed and the next one is tried.
    ///
    /// # Errors
    ///
    /// `EnvelopeError::DecryptionFailed` once every candidate is exhausted.
    /// Callers should read this as "not addressed to this device".
    pub fn decrypt(
        &self,
        envelope: &ContentEnvelope,
        local_device_id: &str,
        local_key: &SecretKey,
    ) -> Result<Vec<u8>, EnvelopeError> {
        self.unwrap_plan(envelope, local_device_id)
            .iter()
            .find_map(|strategy| {
                let attempt = strategy
                    .content_key(local_key, self.team_keys.as_ref())
                    .and_then(|content_key| Self::open(envelope, &content_key));
                match attempt {
                    Ok(plaintext) => Some(plaintext),
                    Err(e) => {
                        tracing::trace!(?strategy, error = %e, "unwrap candidate failed");
                        None
                    }
                }
            })
            .ok_or(EnvelopeError::DecryptionFailed)
    }

    /// Pure append of a wrap, rejecting duplicate recipients
    pub fn append_wrap(
        &self,
        envelope: &mut ContentEnvelope,
        entry: WrappedKeyEntry,
    ) -> Result<(), EnvelopeError> {
        envelope.append_wrap(entry)
    }

    /// Recover the content key through the author's own self-wrap only
    ///
    /// Used by backfill: no other recipient's wrap is consulted.
    pub fn recover_self_key(
        &self,
        envelope: &ContentEnvelope,
        author_user_id: &str,
        author: &DeviceIdentity,
    ) -> Result<Secret, EnvelopeError> {
        envelope
            .wrapped_keys()
            .iter()
            .filter(|entry| entry.is_for(author_user_id, author.device_id()))
            .find_map(|entry| {
                UnwrapStrategy::AddressedWrap(entry)
                    .content_key(author.encryption_key(), None)
                    .and_then(|content_key| {
                        // the recovered key must actually open this envelope
                        Self::open(envelope, &content_key).map(|_| content_key)
                    })
                    .ok()
            })
            .ok_or_else(|| EnvelopeError::NoSelfWrap(author.device_id().to_string()))
    }

    /// Wrap an already recovered content key for one more device
    ///
    /// A fresh ephemeral keypair is drawn for every call.
    pub fn wrap_for(
        &self,
        content_key: &Secret,
        recipient: &RecipientKeyRecord,
    ) -> Result<WrappedKeyEntry, EnvelopeError> {
        let ephemeral = SecretKey::generate()?;
        let wrapped = wrap_key(content_key, &ephemeral, &recipient.encryption_public_key)?;
        Ok(WrappedKeyEntry::new(
            &recipient.user_id,
            &recipient.device_id,
            ephemeral.public(),
            wrapped,
        ))
    }

    fn open(envelope: &ContentEnvelope, content_key: &Secret) -> Result<Vec<u8>, EnvelopeError> {
        Ok(content_key.decrypt(envelope.iv(), envelope.ciphertext(), envelope.aad())?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Device {
        user_id: &'static str,
        identity: DeviceIdentity,
    }

    impl Device {
        fn new(user_id: &'static str, device_id: &str) -> Self {
            Self {
                user_id,
                identity: DeviceIdentity::generate(device_id, true).unwrap(),
            }
        }

        fn record(&self) -> RecipientKeyRecord {
            self.identity.public_record(self.user_id)
        }

        fn decrypt(&self, engine: &EnvelopeEngine, envelope: &ContentEnvelope) -> Result<Vec<u8>, EnvelopeError> {
            engine.decrypt(envelope, self.identity.device_id(), self.identity.encryption_key())
        }
    }

    #[test]
    fn test_roundtrip_for_every_recipient() {
        let engine = EnvelopeEngine::new();
        let sender = Device::new("alice", "alice-laptop");
        let recipients = vec![
            Device::new("alice", "alice-phone"),
            Device::new("bob", "bob-desktop"),
            Device::new("carol", "carol-laptop"),
        ];
        let records: Vec<_> = recipients.iter().map(Device::record).collect();

        let envelope = engine
            .encrypt(b"quarterly numbers", &records, sender.user_id, &sender.identity)
            .unwrap();
        assert_eq!(envelope.wrapped_keys().len(), 4);

        for device in recipients.iter().chain(std::iter::once(&sender)) {
            assert_eq!(device.decrypt(&engine, &envelope).unwrap(), b"quarterly numbers");
        }
        // decrypting is read-only: order does not matter
        for device in recipients.iter().rev() {
            assert_eq!(device.decrypt(&engine, &envelope).unwrap(), b"quarterly numbers");
        }
    }

    #[test]
    fn test_missing_recipients() {
        let engine = EnvelopeEngine::new();
        let sender = Device::new("alice", "alice-laptop");
        let result = engine.encrypt(b"x", &[], sender.user_id, &sender.identity);
        assert!(matches!(result, Err(EnvelopeError::MissingRecipientKeys)));
    }

    #[test]
    fn test_non_recipient_fails() {
        let engine = EnvelopeEngine::new();
        let sender = Device::new("alice", "alice-laptop");
        let bob = Device::new("bob", "bob-desktop");
        let mallory = Device::new("mallory", "mallory-laptop");

        let envelope = engine
            .encrypt(b"hello", &[bob.record()], sender.user_id, &sender.identity)
            .unwrap();
        assert!(matches!(
            mallory.decrypt(&engine, &envelope),
            Err(EnvelopeError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_self_wrap_and_dedup() {
        let engine = EnvelopeEngine::new();
        let sender = Device::new("alice", "alice-laptop");
        let bob = Device::new("bob", "bob-desktop");

        // stale directory key for the sender's own device is ignored
        let stale_self = RecipientKeyRecord::new(
            "alice",
            "alice-laptop",
            SecretKey::generate().unwrap().public(),
        );
        let envelope = engine
            .encrypt(
                b"hello",
                &[bob.record(), bob.record(), stale_self],
                sender.user_id,
                &sender.identity,
            )
            .unwrap();

        assert_eq!(envelope.wrapped_keys().len(), 2);
        assert!(envelope.has_wrap_for("alice", "alice-laptop"));
        assert_eq!(envelope.sender_user_id(), Some("alice"));
        assert_eq!(envelope.sender_device_id(), Some("alice-laptop"));
        assert_eq!(sender.decrypt(&engine, &envelope).unwrap(), b"hello");
    }

    #[test]
    fn test_fresh_content_key_and_ephemeral_per_envelope() {
        let engine = EnvelopeEngine::new();
        let sender = Device::new("alice", "alice-laptop");
        let bob = Device::new("bob", "bob-desktop");

        let first = engine
            .encrypt(b"same", &[bob.record()], sender.user_id, &sender.identity)
            .unwrap();
        let second = engine
            .encrypt(b"same", &[bob.record()], sender.user_id, &sender.identity)
            .unwrap();

        assert_ne!(first.ciphertext(), second.ciphertext());
        let epk = |e: &ContentEnvelope| e.wrapped_keys()[0].sender_ephemeral_public_key;
        assert_ne!(epk(&first), epk(&second));
        // shared within one envelope
        assert_eq!(
            first.wrapped_keys()[0].sender_ephemeral_public_key,
            first.wrapped_keys()[1].sender_ephemeral_public_key
        );

        let k1 = engine.recover_self_key(&first, "alice", &sender.identity).unwrap();
        let k2 = engine.recover_self_key(&second, "alice", &sender.identity).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_tamper_detection() {
        let engine = EnvelopeEngine::new();
        let sender = Device::new("alice", "alice-laptop");
        let bob = Device::new("bob", "bob-desktop");
        let envelope = engine
            .encrypt(b"do not touch", &[bob.record()], sender.user_id, &sender.identity)
            .unwrap();

        let mut tampered = envelope.clone();
        tampered.ciphertext[0] ^= 0x01;
        assert!(matches!(bob.decrypt(&engine, &tampered), Err(EnvelopeError::DecryptionFailed)));

        let mut tampered = envelope.clone();
        let mut iv = *tampered.iv.bytes();
        iv[11] ^= 0x80;
        tampered.iv = iv.into();
        assert!(matches!(bob.decrypt(&engine, &tampered), Err(EnvelopeError::DecryptionFailed)));

        let mut tampered = envelope.clone();
        for entry in tampered.wrapped_keys.iter_mut() {
            entry.wrapped_content_key[5] ^= 0x10;
        }
        assert!(matches!(bob.decrypt(&engine, &tampered), Err(EnvelopeError::DecryptionFailed)));

        let mut tampered = envelope.clone();
        for entry in tampered.wrapped_keys.iter_mut() {
            let mut iv = *entry.wrap_iv.bytes();
            iv[0] ^= 0x02;
            entry.wrap_iv = iv.into();
        }
        assert!(matches!(bob.decrypt(&engine, &tampered), Err(EnvelopeError::DecryptionFailed)));

        assert_eq!(bob.decrypt(&engine, &envelope).unwrap(), b"do not touch");
    }

    #[test]
    fn test_aad_is_bound_to_envelope() {
        let engine = EnvelopeEngine::new();
        let sender = Device::new("alice", "alice-laptop");
        let bob = Device::new("bob", "bob-desktop");
        let envelope = engine
            .encrypt_with(
                b"bound",
                &[bob.record()],
                sender.user_id,
                &sender.identity,
                EncryptOptions {
                    aad: Some(b"item:42".to_vec()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(bob.decrypt(&engine, &envelope).unwrap(), b"bound");

        let mut moved = envelope.clone();
        moved.aad = Some(b"item:43".to_vec());
        assert!(bob.decrypt(&engine, &moved).is_err());
    }

    #[test]
    fn test_mislabelled_wrap_still_opens() {
        let engine = EnvelopeEngine::new();
        let sender = Device::new("alice", "alice-laptop");
        let bob = Device::new("bob", "bob-desktop");
        let mut envelope = engine
            .encrypt(b"relabelled", &[bob.record()], sender.user_id, &sender.identity)
            .unwrap();
        envelope.wrapped_keys[1].recipient_device_id = "something-else".to_string();

        let plan = engine.unwrap_plan(&envelope, "bob-desktop");
        assert!(plan
            .iter()
            .all(|s| matches!(s, UnwrapStrategy::OtherWrap(_))));
        assert_eq!(bob.decrypt(&engine, &envelope).unwrap(), b"relabelled");
    }

    #[test]
    fn test_plan_orders_addressed_first() {
        let engine = EnvelopeEngine::new();
        let sender = Device::new("alice", "alice-laptop");
        let bob = Device::new("bob", "bob-desktop");
        let envelope = engine
            .encrypt(b"x", &[bob.record()], sender.user_id, &sender.identity)
            .unwrap();

        let plan = engine.unwrap_plan(&envelope, "bob-desktop");
        assert_eq!(plan.len(), 2);
        assert!(matches!(plan[0], UnwrapStrategy::AddressedWrap(e) if e.recipient_device_id == "bob-desktop"));
        assert!(matches!(plan[1], UnwrapStrategy::OtherWrap(_)));
    }

    #[test]
    fn test_team_key_fallback() {
        let team_key = Secret::generate().unwrap();
        let mut keyring = TeamKeyring::new();
        keyring.insert("team-red", team_key.clone());

        let engine = EnvelopeEngine::new();
        let envelope = engine.seal_for_team(b"standup notes", "team-red", &team_key).unwrap();
        assert_eq!(envelope.team_id(), Some("team-red"));

        let outsider = Device::new("dave", "dave-laptop");
        // without a keyring the only candidates are device wraps, which fail
        assert!(outsider.decrypt(&engine, &envelope).is_err());

        let with_keys = EnvelopeEngine::new().with_team_keys(keyring);
        let plan = with_keys.unwrap_plan(&envelope, "dave-laptop");
        assert!(matches!(plan.last(), Some(UnwrapStrategy::TeamKey { team_id: "team-red", .. })));
        assert_eq!(outsider.decrypt(&with_keys, &envelope).unwrap(), b"standup notes");
    }

    #[test]
    fn test_team_fallback_requires_team_declaration() {
        let team_key = Secret::generate().unwrap();
        let mut keyring = TeamKeyring::new();
        keyring.insert("team-red", team_key.clone());
        let engine = EnvelopeEngine::new().with_team_keys(keyring);

        let mut envelope = engine.seal_for_team(b"notes", "team-red", &team_key).unwrap();
        envelope.metadata.remove(META_TEAM_ID);

        let device = Device::new("dave", "dave-laptop");
        assert!(engine
            .unwrap_plan(&envelope, "dave-laptop")
            .iter()
            .all(|s| !matches!(s, UnwrapStrategy::TeamKey { .. })));
        assert!(matches!(
            device.decrypt(&engine, &envelope),
            Err(EnvelopeError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_append_wrap_rejects_duplicates() {
        let engine = EnvelopeEngine::new();
        let sender = Device::new("alice", "alice-laptop");
        let bob = Device::new("bob", "bob-desktop");
        let carol = Device::new("carol", "carol-laptop");
        let mut envelope = engine
            .encrypt(b"x", &[bob.record()], sender.user_id, &sender.identity)
            .unwrap();

        let content_key = engine.recover_self_key(&envelope, "alice", &sender.identity).unwrap();
        let duplicate = engine.wrap_for(&content_key, &bob.record()).unwrap();
        assert!(matches!(
            engine.append_wrap(&mut envelope, duplicate),
            Err(EnvelopeError::DuplicateRecipient { .. })
        ));

        let before = envelope.wrapped_keys().to_vec();
        let entry = engine.wrap_for(&content_key, &carol.record()).unwrap();
        engine.append_wrap(&mut envelope, entry).unwrap();
        assert_eq!(&envelope.wrapped_keys()[..before.len()], before.as_slice());
        assert_eq!(carol.decrypt(&engine, &envelope).unwrap(), b"x");
    }

    #[test]
    fn test_wire_shape() {
        let engine = EnvelopeEngine::new();
        let sender = Device::new("alice", "alice-laptop");
        let bob = Device::new("bob", "bob-desktop");
        let envelope = engine
            .encrypt(b"wire", &[bob.record()], sender.user_id, &sender.identity)
            .unwrap();

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json["ciphertextB64u"].is_string());
        assert!(json["ivB64u"].is_string());
        assert!(json.get("aad").is_none());
        let wrap = &json["wrappedKeys"][1];
        assert_eq!(wrap["recipientUserId"], "bob");
        assert_eq!(wrap["recipientDeviceId"], "bob-desktop");
        assert_eq!(wrap["senderEphemeralPublicKeyJwk"]["crv"], "P-256");
        assert!(wrap["wrappedCekB64u"].as_str().unwrap().chars().all(|c| c != '=' && c != '+' && c != '/'));
        assert!(wrap["wrapIvB64u"].is_string());
        assert_eq!(json["metadata"]["senderUserId"], "alice");

        let parsed: ContentEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(bob.decrypt(&engine, &parsed).unwrap(), b"wire");
    }
}
