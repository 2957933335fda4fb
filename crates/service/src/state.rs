use std::sync::Arc;

use common::directory::{DirectoryConfig, DynKeyDirectory, MemoryKeyDirectory};
use common::envelope::{DynEnvelopeStore, MemoryEnvelopeStore};
use common::handshake::HandshakeService;
use common::pairing::PairingService;
use common::session_store::{DynClock, DynSessionStore, MemorySessionStore, SystemClock};

use super::config::Config;
use super::database::{
    Database, DatabaseSetupError, SqliteEnvelopeStore, SqliteKeyDirectory, SqliteSessionStore,
};

/// Main service state - every handler reaches the stores through here
#[derive(Clone, Debug)]
pub struct State {
    directory: DynKeyDirectory,
    sessions: DynSessionStore,
    envelopes: DynEnvelopeStore,
    handshakes: HandshakeService,
    pairing: PairingService,
    completion_token: Option<String>,
    database: Option<Database>,
}

impl State {
    pub async fn from_config(config: &Config) -> Result<Self, StateSetupError> {
        let clock: DynClock = Arc::new(SystemClock);
        match config.sqlite_path {
            Some(ref path) => {
                tracing::info!(path = %path.display(), "using sqlite backends");
                let database = Database::new(path).await?;
                Ok(Self::with_database(config, database, clock))
            }
            None => {
                tracing::info!("using in-memory backends");
                Ok(Self::in_memory(config, clock))
            }
        }
    }

    /// Process-local backends; everything is lost on restart
    pub fn in_memory(config: &Config, clock: DynClock) -> Self {
        Self::assemble(
            config,
            Arc::new(MemoryKeyDirectory::new(directory_config(config))),
            Arc::new(MemorySessionStore::with_clock(clock.clone())),
            Arc::new(MemoryEnvelopeStore::new()),
            clock,
            None,
        )
    }

    pub fn with_database(config: &Config, database: Database, clock: DynClock) -> Self {
        Self::assemble(
            config,
            Arc::new(SqliteKeyDirectory::new(
                database.clone(),
                directory_config(config),
            )),
            Arc::new(SqliteSessionStore::new(database.clone(), clock.clone())),
            Arc::new(SqliteEnvelopeStore::new(database.clone())),
            clock,
            Some(database),
        )
    }

    fn assemble(
        config: &Config,
        directory: DynKeyDirectory,
        sessions: DynSessionStore,
        envelopes: DynEnvelopeStore,
        clock: DynClock,
        database: Option<Database>,
    ) -> Self {
        let handshakes = HandshakeService::new(sessions.clone())
            .with_clock(clock.clone())
            .with_ttl(config.handshake_ttl);
        let pairing = PairingService::new(sessions.clone(), directory.clone(), envelopes.clone())
            .with_clock(clock)
            .with_max_ttl(config.pairing_ttl_max);

        Self {
            directory,
            sessions,
            envelopes,
            handshakes,
            pairing,
            completion_token: config.completion_token.clone(),
            database,
        }
    }

    pub fn directory(&self) -> &DynKeyDirectory {
        &self.directory
    }

    pub fn sessions(&self) -> &DynSessionStore {
        &self.sessions
    }

    pub fn envelopes(&self) -> &DynEnvelopeStore {
        &self.envelopes
    }

    pub fn handshakes(&self) -> &HandshakeService {
        &self.handshakes
    }

    pub fn pairing(&self) -> &PairingService {
        &self.pairing
    }

    /// Credential required to complete a handshake, if completion is enabled
    pub fn completion_token(&self) -> Option<&str> {
        self.completion_token.as_deref()
    }

    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }
}

fn directory_config(config: &Config) -> DirectoryConfig {
    DirectoryConfig {
        max_devices_per_user: config.max_devices_per_user,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("Database setup error: {0}")]
    DatabaseSetupError(#[from] DatabaseSetupError),
}
