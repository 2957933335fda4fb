use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::crypto::{PublicKey, SecretKey};
use crate::session_store::{
    DynClock, DynSessionStore, SessionStoreError, SessionStoreExt, SystemClock,
};

use super::session::{CompletedHandshake, HandshakeInit, HandshakePayload, HandshakeSession};
use super::HandshakeError;

pub const DEFAULT_HANDSHAKE_TTL: Duration = Duration::from_secs(5 * 60);

/// How long an expired record is kept around so readers can be told
/// `ExpiredSession` rather than `NotFound`
const EXPIRED_RECORD_GRACE: Duration = Duration::from_secs(10 * 60);

fn session_key(id: &Uuid) -> String {
    format!("handshake:{}", id)
}

#[derive(Debug, Clone)]
pub struct HandshakeService {
    store: DynSessionStore,
    clock: DynClock,
    ttl: Duration,
}

impl HandshakeService {
    pub fn new(store: DynSessionStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            ttl: DEFAULT_HANDSHAKE_TTL,
        }
    }

    pub fn with_clock(mut self, clock: DynClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Open a new session for `client_public_key`
    ///
    /// A TTL too large to be represented as an expiry instant is rejected
    /// with `SessionStoreError::InvalidTtl`.
    pub async fn init(&self, client_public_key: PublicKey) -> Result<HandshakeInit, HandshakeError> {
        let invalid_ttl = || SessionStoreError::InvalidTtl(self.ttl);
        let id = Uuid::new_v4();
        let created_at = self.clock.now();
        let ttl = chrono::Duration::from_std(self.ttl).map_err(|_| invalid_ttl())?;
        let expires_at = created_at.checked_add_signed(ttl).ok_or_else(invalid_ttl)?;
        let expires_in_ms = u64::try_from(self.ttl.as_millis()).map_err(|_| invalid_ttl())?;
        let retention = self
            .ttl
            .checked_add(EXPIRED_RECORD_GRACE)
            .ok_or_else(invalid_ttl)?;

        let session = HandshakeSession {
            id,
            client_public_key,
            completed: None,
            created_at,
            expires_at,
        };
        self.store
            .put_json(&session_key(&id), &session, retention)
            .await?;

        tracing::debug!(handshake_id = %id, client_key = %client_public_key.fingerprint(), "handshake initiated");
        Ok(HandshakeInit {
            handshake_id: id,
            expires_in_ms,
        })
    }

    /// Seal `payload` for the session's client and attach it to the session
    ///
    /// # Errors
    ///
    /// * `InvalidHandshake` - the session id is unknown
    /// * `ExpiredSession` - the session's TTL already elapsed
    /// * `AlreadyCompleted` - a payload is already attached
    pub async fn complete(&self, id: Uuid, payload: &[u8]) -> Result<(), HandshakeError> {
        let mut session = self
            .load(id)
            .await?
            .ok_or(HandshakeError::InvalidHandshake(id))?;
        if session.is_expired(self.clock.now()) {
            return Err(HandshakeError::ExpiredSession(id));
        }
        if session.completed.is_some() {
            return Err(HandshakeError::AlreadyCompleted(id));
        }

        let completed = {
            let server_ephemeral = SecretKey::generate()?;
            let session_key = server_ephemeral.agree(&session.client_public_key);
            let (iv, ciphertext) = session_key.seal(payload, None)?;
            CompletedHandshake {
                server_public_key: server_ephemeral.public(),
                payload: HandshakePayload { iv, ciphertext },
            }
            // server_ephemeral dropped here
        };
        session.completed = Some(completed);

        if !self.store.replace_json(&session_key(&id), &session).await? {
            return Err(HandshakeError::InvalidHandshake(id));
        }
        tracing::debug!(handshake_id = %id, "handshake completed");
        Ok(())
    }

    /// Poll a session
    ///
    /// # Returns
    /// * `Ok(None)` - the session exists but has not been completed yet
    /// * `Ok(Some(_))` - the sealed payload. Repeated calls return the same
    ///   payload until the session expires.
    ///
    /// # Errors
    ///
    /// * `ExpiredSession` - the TTL elapsed less than ten minutes ago and the
    ///   record is still retained
    /// * `NotFound` - the id is unknown, or the expired record has since been
    ///   dropped from the store
    ///
    /// Retrieval does not consume the session, so anyone who learns the id
    /// can fetch the sealed payload until expiry.
    pub async fn retrieve(&self, id: Uuid) -> Result<Option<CompletedHandshake>, HandshakeError> {
        let session = self.load(id).await?.ok_or(HandshakeError::NotFound(id))?;
        if session.is_expired(self.clock.now()) {
            return Err(HandshakeError::ExpiredSession(id));
        }
        Ok(session.completed)
    }

    async fn load(&self, id: Uuid) -> Result<Option<HandshakeSession>, HandshakeError> {
        Ok(self.store.get_json(&session_key(&id)).await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::handshake::HandshakeClient;
    use crate::session_store::{ManualClock, MemorySessionStore};

    fn service(clock: &ManualClock) -> HandshakeService {
        let clock: DynClock = Arc::new(clock.clone());
        let store = Arc::new(MemorySessionStore::with_clock(clock.clone()));
        HandshakeService::new(store).with_clock(clock)
    }

    #[tokio::test]
    async fn test_handshake_delivers_payload() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let client = HandshakeClient::new().unwrap();

        let init = service.init(client.public_key()).await.unwrap();
        assert_eq!(init.expires_in_ms, 300_000);
        assert_eq!(service.retrieve(init.handshake_id).await.unwrap(), None);

        service
            .complete(init.handshake_id, b"{\"access_token\":\"abc\"}")
            .await
            .unwrap();

        let completed = service.retrieve(init.handshake_id).await.unwrap().unwrap();
        assert_eq!(client.open(&completed).unwrap(), b"{\"access_token\":\"abc\"}");

        // non-consuming
        let again = service.retrieve(init.handshake_id).await.unwrap().unwrap();
        assert_eq!(again, completed);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let id = Uuid::new_v4();

        assert!(matches!(
            service.complete(id, b"x").await,
            Err(HandshakeError::InvalidHandshake(_))
        ));
        assert!(matches!(
            service.retrieve(id).await,
            Err(HandshakeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_once() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let client = HandshakeClient::new().unwrap();
        let init = service.init(client.public_key()).await.unwrap();

        service.complete(init.handshake_id, b"first").await.unwrap();
        assert!(matches!(
            service.complete(init.handshake_id, b"second").await,
            Err(HandshakeError::AlreadyCompleted(_))
        ));
        let completed = service.retrieve(init.handshake_id).await.unwrap().unwrap();
        assert_eq!(client.open(&completed).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let client = HandshakeClient::new().unwrap();
        let init = service.init(client.public_key()).await.unwrap();
        service.complete(init.handshake_id, b"tokens").await.unwrap();

        clock.advance(DEFAULT_HANDSHAKE_TTL);
        assert!(service.retrieve(init.handshake_id).await.unwrap().is_some());

        clock.advance(Duration::from_millis(1));
        assert!(matches!(
            service.retrieve(init.handshake_id).await,
            Err(HandshakeError::ExpiredSession(_))
        ));

        // once the record is physically gone the id is simply unknown
        clock.advance(EXPIRED_RECORD_GRACE);
        assert!(matches!(
            service.retrieve(init.handshake_id).await,
            Err(HandshakeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_after_expiry() {
        let clock = ManualClock::default();
        let service = service(&clock).with_ttl(Duration::from_secs(30));
        let client = HandshakeClient::new().unwrap();
        let init = service.init(client.public_key()).await.unwrap();
        assert_eq!(init.expires_in_ms, 30_000);

        clock.advance(Duration::from_secs(31));
        assert!(matches!(
            service.complete(init.handshake_id, b"late").await,
            Err(HandshakeError::ExpiredSession(_))
        ));
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl() {
        let clock = ManualClock::default();
        let service = service(&clock).with_ttl(Duration::from_secs(1 << 50));
        let client = HandshakeClient::new().unwrap();

        assert!(matches!(
            service.init(client.public_key()).await,
            Err(HandshakeError::Store(SessionStoreError::InvalidTtl(_)))
        ));

        let service = service.with_ttl(Duration::MAX);
        assert!(matches!(
            service.init(client.public_key()).await,
            Err(HandshakeError::Store(SessionStoreError::InvalidTtl(_)))
        ));
    }

    #[tokio::test]
    async fn test_other_client_cannot_open() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let client = HandshakeClient::new().unwrap();
        let eavesdropper = HandshakeClient::new().unwrap();

        let init = service.init(client.public_key()).await.unwrap();
        service.complete(init.handshake_id, b"secret").await.unwrap();
        let completed = service.retrieve(init.handshake_id).await.unwrap().unwrap();

        assert!(eavesdropper.open(&completed).is_err());
    }
}
