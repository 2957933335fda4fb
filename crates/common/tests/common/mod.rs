//! Shared fixtures for protocol integration tests
#![allow(dead_code)]

use std::sync::Arc;

use common::directory::{DirectoryConfig, DynKeyDirectory, MemoryKeyDirectory};
use common::envelope::{DynEnvelopeStore, EnvelopeEngine, MemoryEnvelopeStore};
use common::handshake::HandshakeService;
use common::identity::DeviceIdentity;
use common::pairing::PairingService;
use common::session_store::{DynClock, DynSessionStore, ManualClock, MemorySessionStore};

/// One relay's worth of in-memory backends, all on the same manual clock
pub struct Relay {
    pub clock: ManualClock,
    pub sessions: DynSessionStore,
    pub directory: DynKeyDirectory,
    pub envelopes: DynEnvelopeStore,
    pub engine: EnvelopeEngine,
    pub handshakes: HandshakeService,
    pub pairing: PairingService,
}

impl Relay {
    pub fn new() -> Self {
        Self::with_config(DirectoryConfig::default())
    }

    pub fn with_config(config: DirectoryConfig) -> Self {
        let clock = ManualClock::default();
        let dyn_clock: DynClock = Arc::new(clock.clone());
        let sessions: DynSessionStore =
            Arc::new(MemorySessionStore::with_clock(dyn_clock.clone()));
        let directory: DynKeyDirectory = Arc::new(MemoryKeyDirectory::new(config));
        let envelopes: DynEnvelopeStore = Arc::new(MemoryEnvelopeStore::new());

        Self {
            handshakes: HandshakeService::new(sessions.clone()).with_clock(dyn_clock.clone()),
            pairing: PairingService::new(sessions.clone(), directory.clone(), envelopes.clone())
                .with_clock(dyn_clock),
            engine: EnvelopeEngine::new(),
            clock,
            sessions,
            directory,
            envelopes,
        }
    }
}

/// A user's device together with the user it belongs to
pub struct Device {
    pub user_id: String,
    pub identity: DeviceIdentity,
}

impl Device {
    pub fn new(user_id: &str, device_id: &str, is_primary: bool) -> Self {
        Self {
            user_id: user_id.to_string(),
            identity: DeviceIdentity::generate(device_id, is_primary).unwrap(),
        }
    }

    pub fn device_id(&self) -> &str {
        self.identity.device_id()
    }

    pub async fn register(&self, relay: &Relay) {
        relay
            .directory
            .register(self.identity.public_record(&self.user_id))
            .await
            .unwrap();
    }
}
