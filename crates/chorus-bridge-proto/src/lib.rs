//! Chorus Bridge wire messages
//!
//! Protobuf message definitions for federation envelopes, the inner message
//! variants they carry, and the Conductor service types. The structs are
//! maintained by hand with `prost` derives so the build carries no codegen
//! step; tags are part of the wire contract and must never be renumbered.

pub mod conductor;
pub mod kind;
pub mod messages;
pub mod nonce;

pub use kind::MessageKind;
pub use messages::*;
pub use nonce::{deterministic_nonce, DecodedMessage};
