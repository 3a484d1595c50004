//! Chorus Bridge core
//!
//! The federation message pipeline and its periphery:
//!
//! - [`BridgeService`]: envelope intake (verify → dedup → epoch → Conductor
//!   → dispatch → fan-out) plus the day-proof, export, and moderation flows
//! - [`ActivityPubTranslator`]: Chorus posts → ActivityStreams Notes with
//!   deterministic publish timestamps
//! - [`OutboundFederationWorker`] / [`ActivityPubDeliveryWorker`]: reliable
//!   ledger-driven delivery loops with exponential-backoff retries

pub mod activitypub_worker;
pub mod outbound_worker;
pub mod service;
pub mod translator;

pub use activitypub_worker::ActivityPubDeliveryWorker;
pub use outbound_worker::OutboundFederationWorker;
pub use service::BridgeService;
pub use translator::ActivityPubTranslator;
