//! Ephemeral key/value storage with per-entry TTL
//!
//! Handshake sessions and pairing tickets live here. The store is constructed
//! once at process start and injected into the services that use it; the
//! backend (process-local memory, or a shared SQLite database in the relay
//! service) is chosen by the caller without any other component noticing.
//!
//! Expiry is always evaluated lazily at read time against the injected
//! [`Clock`]. Physical removal of dead entries is housekeeping only.

mod clock;
mod memory;
mod provider;

pub use clock::{Clock, DynClock, ManualClock, SystemClock};
pub use memory::MemorySessionStore;
pub use provider::{DynSessionStore, SessionStore, SessionStoreError, SessionStoreExt};
