//! Per-user registry of device public keys
//!
//! The directory answers one question for senders: "which device keys must this
//! content key be wrapped for?". Registration is an atomic upsert keyed by
//! `(user_id, device_id)` that enforces a per-user device cap, and every change
//! is announced on a broadcast channel so that caches of recipient keys can be
//! invalidated.

mod cache;
mod memory;
mod provider;

pub use cache::RecipientCache;
pub use memory::MemoryKeyDirectory;
pub use provider::{
    DirectoryConfig, DirectoryError, DirectoryEvent, DirectoryEvents, DynKeyDirectory,
    KeyDirectory, RecipientKeyRecord, Registration, DEFAULT_MAX_DEVICES_PER_USER,
    DEFAULT_ALGORITHM,
};
