mod common;

use ::common::envelope::EnvelopeError;
use ::common::pairing::DEFAULT_PAIRING_TTL;

use crate::common::{Device, Relay};

#[tokio::test]
async fn test_companion_gains_access_after_pairing() {
    let relay = Relay::new();
    let primary = Device::new("alice", "alice-laptop", true);
    let friend = Device::new("bob", "bob-desktop", true);
    primary.register(&relay).await;
    friend.register(&relay).await;

    // P encrypts "hello" for [P, A]
    let recipients = relay
        .directory
        .list_for_users(&["alice".to_string(), "bob".to_string()])
        .await
        .unwrap();
    let envelope = relay
        .engine
        .encrypt(b"hello", &recipients, &primary.user_id, &primary.identity)
        .unwrap();
    let id = relay.envelopes.put(envelope).await.unwrap();

    // A decrypts
    let stored = relay.envelopes.get(id).await.unwrap().unwrap();
    assert_eq!(
        relay
            .engine
            .decrypt(&stored, friend.device_id(), friend.identity.encryption_key())
            .unwrap(),
        b"hello"
    );

    // B is not a recipient yet
    let companion = Device::new("alice", "alice-phone", false);
    assert!(matches!(
        relay
            .engine
            .decrypt(&stored, companion.device_id(), companion.identity.encryption_key()),
        Err(EnvelopeError::DecryptionFailed)
    ));

    // B pairs with P: token and secret travel out-of-band
    let invite = relay
        .pairing
        .initiate(
            primary.device_id(),
            &primary.identity.encryption_public_key(),
            DEFAULT_PAIRING_TTL,
        )
        .await
        .unwrap();
    let primary_key = relay
        .pairing
        .claim(&invite.token, &invite.secret)
        .await
        .unwrap();
    assert_eq!(primary_key, primary.identity.encryption_public_key());
    relay
        .pairing
        .register_companion(&companion.user_id, &companion.identity)
        .await
        .unwrap();

    // P backfills from the directory record the companion registered
    let companion_record = relay
        .directory
        .list_for_user("alice")
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.device_id == "alice-phone")
        .unwrap();
    let report = relay
        .pairing
        .backfill_authored(&primary.user_id, &primary.identity, &companion_record)
        .await
        .unwrap();
    assert_eq!(report.wrapped, vec![id]);

    // B decrypts with nothing but its own key
    let stored = relay.envelopes.get(id).await.unwrap().unwrap();
    assert_eq!(
        relay
            .engine
            .decrypt(&stored, companion.device_id(), companion.identity.encryption_key())
            .unwrap(),
        b"hello"
    );
    // and A still can
    assert_eq!(
        relay
            .engine
            .decrypt(&stored, friend.device_id(), friend.identity.encryption_key())
            .unwrap(),
        b"hello"
    );
}

#[tokio::test]
async fn test_backfill_leaves_other_authors_alone() {
    let relay = Relay::new();
    let primary = Device::new("alice", "alice-laptop", true);
    let friend = Device::new("bob", "bob-desktop", true);

    let mine = relay
        .engine
        .encrypt(
            b"from alice",
            &[friend.identity.public_record("bob")],
            "alice",
            &primary.identity,
        )
        .unwrap();
    let theirs = relay
        .engine
        .encrypt(
            b"from bob",
            &[primary.identity.public_record("alice")],
            "bob",
            &friend.identity,
        )
        .unwrap();
    let mine = relay.envelopes.put(mine).await.unwrap();
    let theirs = relay.envelopes.put(theirs).await.unwrap();

    let companion = Device::new("alice", "alice-phone", false);
    let report = relay
        .pairing
        .backfill(
            &[mine, theirs],
            "alice",
            &primary.identity,
            &companion.identity.public_record("alice"),
        )
        .await
        .unwrap();
    assert_eq!(report.wrapped, vec![mine]);

    let theirs = relay.envelopes.get(theirs).await.unwrap().unwrap();
    assert!(!theirs.has_wrap_for("alice", "alice-phone"));
}

#[tokio::test]
async fn test_handshake_delivers_tokens() {
    use ::common::handshake::{HandshakeClient, HandshakeError, DEFAULT_HANDSHAKE_TTL};
    use std::time::Duration;

    let relay = Relay::new();
    let client = HandshakeClient::new().unwrap();
    let init = relay.handshakes.init(client.public_key()).await.unwrap();

    relay
        .handshakes
        .complete(init.handshake_id, br#"{"accessToken":"t0k3n"}"#)
        .await
        .unwrap();

    relay.clock.advance(DEFAULT_HANDSHAKE_TTL / 2);
    let completed = relay
        .handshakes
        .retrieve(init.handshake_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.open(&completed).unwrap(), br#"{"accessToken":"t0k3n"}"#);

    relay.clock.advance(DEFAULT_HANDSHAKE_TTL / 2 + Duration::from_millis(1));
    assert!(matches!(
        relay.handshakes.retrieve(init.handshake_id).await,
        Err(HandshakeError::ExpiredSession(_))
    ));
}
