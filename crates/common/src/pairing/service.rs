use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::crypto::PublicKey;
use crate::directory::{DynKeyDirectory, Registration};
use crate::envelope::{DynEnvelopeStore, EnvelopeEngine};
use crate::identity::DeviceIdentity;
use crate::session_store::{DynClock, DynSessionStore, SessionStoreExt, SystemClock};

use super::ticket::{open_primary_key, seal_primary_key, PairingSecret, PairingTicket, SealedTicket};
use super::PairingError;

pub const DEFAULT_PAIRING_TTL: Duration = Duration::from_secs(5 * 60);
/// Upper bound on the lifetime a primary may request for a ticket
pub const MAX_PAIRING_TTL: Duration = Duration::from_secs(10 * 60);

const TOKEN_SIZE: usize = 24;
/// Expired tickets stay readable this long so claimers get `ExpiredSession`
const EXPIRED_RECORD_GRACE: Duration = Duration::from_secs(10 * 60);

fn ticket_key(token: &str) -> String {
    format!("pairing:{}", token)
}

fn new_token() -> Result<String, PairingError> {
    let mut bytes = [0u8; TOKEN_SIZE];
    crate::crypto::fill_random(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// What the primary device conveys to the companion, over two channels
#[derive(Debug, Clone)]
pub struct PairingInvite {
    pub token: String,
    pub secret: PairingSecret,
}

/// Pairing and backfill on top of the shared stores
///
/// `park_ticket` and `claim_ticket` are the relay's half and only ever see
/// sealed material. `initiate`, `claim`, `register_companion` and `backfill`
/// are the device half.
#[derive(Debug, Clone)]
pub struct PairingService {
    pub(super) sessions: DynSessionStore,
    pub(super) directory: DynKeyDirectory,
    pub(super) envelopes: DynEnvelopeStore,
    pub(super) engine: EnvelopeEngine,
    clock: DynClock,
    max_ttl: Duration,
}

impl PairingService {
    pub fn new(
        sessions: DynSessionStore,
        directory: DynKeyDirectory,
        envelopes: DynEnvelopeStore,
    ) -> Self {
        Self {
            sessions,
            directory,
            envelopes,
            engine: EnvelopeEngine::new(),
            clock: Arc::new(SystemClock),
            max_ttl: MAX_PAIRING_TTL,
        }
    }

    pub fn with_clock(mut self, clock: DynClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_ttl(mut self, max_ttl: Duration) -> Self {
        self.max_ttl = max_ttl;
        self
    }

    pub fn with_engine(mut self, engine: EnvelopeEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Park a sealed ticket and hand back its token
    pub async fn park_ticket(
        &self,
        device_id: &str,
        sealed: SealedTicket,
        ttl: Duration,
    ) -> Result<String, PairingError> {
        if ttl.is_zero() || ttl > self.max_ttl {
            return Err(PairingError::InvalidTtl {
                ttl,
                max: self.max_ttl,
            });
        }
        let invalid_ttl = || PairingError::InvalidTtl {
            ttl,
            max: self.max_ttl,
        };
        let token = new_token()?;
        let created_at = self.clock.now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .ok_or_else(invalid_ttl)?;
        let retention = ttl.checked_add(EXPIRED_RECORD_GRACE).ok_or_else(invalid_ttl)?;
        let ticket = PairingTicket {
            token: token.clone(),
            device_id: device_id.to_string(),
            sealed,
            created_at,
            expires_at,
        };
        self.sessions
            .put_json(&ticket_key(&token), &ticket, retention)
            .await?;

        tracing::info!(device_id, ttl_ms = ttl.as_millis() as u64, "pairing ticket parked");
        Ok(token)
    }

    /// Consume a parked ticket. A token can be claimed at most once.
    ///
    /// The ticket is removed before anything else is checked, so a claim
    /// attempt uses the token up whatever its outcome. An expired ticket
    /// yields `ExpiredSession` once; later claims, or claims after the
    /// retention window, yield `NotFound`.
    pub async fn claim_ticket(&self, token: &str) -> Result<PairingTicket, PairingError> {
        let ticket: PairingTicket = self
            .sessions
            .take_json(&ticket_key(token))
            .await?
            .ok_or(PairingError::NotFound)?;
        if ticket.is_expired(self.clock.now()) {
            return Err(PairingError::ExpiredSession);
        }
        tracing::info!(device_id = %ticket.device_id, "pairing ticket claimed");
        Ok(ticket)
    }

    /// Start pairing from the primary device
    pub async fn initiate(
        &self,
        primary_device_id: &str,
        primary_public_key: &PublicKey,
        ttl: Duration,
    ) -> Result<PairingInvite, PairingError> {
        let secret = PairingSecret::generate()?;
        let sealed = seal_primary_key(&secret, primary_public_key)?;
        let token = self.park_ticket(primary_device_id, sealed, ttl).await?;
        Ok(PairingInvite { token, secret })
    }

    /// Claim a ticket on the companion device and recover the primary's key
    ///
    /// The ticket is consumed even when `secret` turns out to be wrong
    /// (`InvalidSecret`); pairing then has to be initiated again.
    pub async fn claim(
        &self,
        token: &str,
        secret: &PairingSecret,
    ) -> Result<PublicKey, PairingError> {
        let ticket = self.claim_ticket(token).await?;
        open_primary_key(secret, &ticket.sealed)
    }

    /// Register the companion's own freshly generated key
    pub async fn register_companion(
        &self,
        user_id: &str,
        companion: &DeviceIdentity,
    ) -> Result<Registration, PairingError> {
        Ok(self
            .directory
            .register(companion.public_record(user_id))
            .await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::directory::MemoryKeyDirectory;
    use crate::envelope::MemoryEnvelopeStore;
    use crate::session_store::{ManualClock, MemorySessionStore};

    fn service(clock: &ManualClock) -> PairingService {
        let clock: DynClock = Arc::new(clock.clone());
        PairingService::new(
            Arc::new(MemorySessionStore::with_clock(clock.clone())),
            Arc::new(MemoryKeyDirectory::default()),
            Arc::new(MemoryEnvelopeStore::new()),
        )
        .with_clock(clock)
    }

    #[tokio::test]
    async fn test_initiate_claim() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let primary = DeviceIdentity::generate("laptop", true).unwrap();

        let invite = service
            .initiate("laptop", &primary.encryption_public_key(), DEFAULT_PAIRING_TTL)
            .await
            .unwrap();
        let key = service.claim(&invite.token, &invite.secret).await.unwrap();
        assert_eq!(key, primary.encryption_public_key());

        // single use
        assert!(matches!(
            service.claim(&invite.token, &invite.secret).await,
            Err(PairingError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_claim_unknown_and_expired() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let primary = DeviceIdentity::generate("laptop", true).unwrap();
        let secret = PairingSecret::generate().unwrap();

        assert!(matches!(
            service.claim("nope", &secret).await,
            Err(PairingError::NotFound)
        ));

        let invite = service
            .initiate("laptop", &primary.encryption_public_key(), Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(61));
        assert!(matches!(
            service.claim(&invite.token, &invite.secret).await,
            Err(PairingError::ExpiredSession)
        ));
        // the expired ticket went with that claim
        assert!(matches!(
            service.claim(&invite.token, &invite.secret).await,
            Err(PairingError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_expired_ticket_retention() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let primary = DeviceIdentity::generate("laptop", true).unwrap();
        let invite = service
            .initiate("laptop", &primary.encryption_public_key(), Duration::from_secs(60))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(61) + EXPIRED_RECORD_GRACE);
        assert!(matches!(
            service.claim(&invite.token, &invite.secret).await,
            Err(PairingError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_wrong_secret() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let primary = DeviceIdentity::generate("laptop", true).unwrap();
        let invite = service
            .initiate("laptop", &primary.encryption_public_key(), DEFAULT_PAIRING_TTL)
            .await
            .unwrap();

        let wrong = PairingSecret::generate().unwrap();
        assert!(matches!(
            service.claim(&invite.token, &wrong).await,
            Err(PairingError::InvalidSecret)
        ));

        // a failed claim still burns the ticket
        assert!(matches!(
            service.claim(&invite.token, &invite.secret).await,
            Err(PairingError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_ttl_bounds() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let sealed = seal_primary_key(
            &PairingSecret::generate().unwrap(),
            &DeviceIdentity::generate("laptop", true)
                .unwrap()
                .encryption_public_key(),
        )
        .unwrap();

        for ttl in [Duration::ZERO, MAX_PAIRING_TTL + Duration::from_secs(1)] {
            assert!(matches!(
                service.park_ticket("laptop", sealed.clone(), ttl).await,
                Err(PairingError::InvalidTtl { .. })
            ));
        }
        service
            .park_ticket("laptop", sealed.clone(), MAX_PAIRING_TTL)
            .await
            .unwrap();

        let unbounded = service.clone().with_max_ttl(Duration::MAX);
        for ttl in [Duration::from_secs(1 << 50), Duration::MAX] {
            assert!(matches!(
                unbounded.park_ticket("laptop", sealed.clone(), ttl).await,
                Err(PairingError::InvalidTtl { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let clock = ManualClock::default();
        let service = service(&clock);
        let key = DeviceIdentity::generate("laptop", true)
            .unwrap()
            .encryption_public_key();
        let a = service.initiate("laptop", &key, DEFAULT_PAIRING_TTL).await.unwrap();
        let b = service.initiate("laptop", &key, DEFAULT_PAIRING_TTL).await.unwrap();
        assert_ne!(a.token, b.token);
        assert_ne!(a.secret, b.secret);
    }
}
