//! Chorus Bridge persistence layer
//!
//! PostgreSQL-backed durable storage for the bridge: replay and idempotency
//! caches, the outbound and export delivery ledgers, moderation records,
//! federated-entity copies, and the day-proof cache.
//!
//! # Store trait
//!
//! Every persistence primitive is a top-level operation on [`BridgeStore`].
//! [`PgStore`] is the production implementation; [`MemoryStore`] backs tests
//! and local development with identical semantics (atomic insert-if-absent,
//! exclusive ledger checkout, terminal-state guards).

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgStore;
pub use store::BridgeStore;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds
///
/// Wall-clock time feeds only TTLs and retry scheduling, never epochs.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
