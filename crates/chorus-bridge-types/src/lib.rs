//! Chorus Bridge foundation types
//!
//! Shared building blocks for the bridge workspace:
//! - Error taxonomy mapped 1:1 to HTTP statuses at the edge
//! - Wire-adjacent schemas (day proofs, export/moderation requests, Notes)
//! - The configuration surface consumed by the server binary

pub mod config;
pub mod error;
pub mod schemas;

pub use config::{BridgeConfig, DispatchFlags};
pub use error::{BridgeError, BridgeResult};
pub use schemas::*;
