//! Relay server for keyrelay.
//!
//! The relay never sees plaintext. It stores and serves:
//! - Device public keys (key directory with the per-user device cap)
//! - Sealed content envelopes, with append-only wrap lists for backfill
//! - Handshake sessions and pairing tickets, in a TTL session store
//!
//! Backends are SQLite when a database path is configured and process-local
//! memory otherwise.

pub mod config;
pub mod database;
pub mod http;
pub mod process;
pub mod state;
pub mod version;

// Re-export key types for convenience
pub use config::Config;
pub use database::{Database, DatabaseSetupError};
pub use state::{State as ServiceState, StateSetupError};
