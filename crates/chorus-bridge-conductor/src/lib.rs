//! Chorus Bridge Conductor client stack
//!
//! A single polymorphic [`ConductorClient`] interface with three concrete
//! transports (HTTP, gRPC, in-memory) and two transparent decorators:
//!
//! - [`CachedConductorClient`]: LRU+TTL cache for day proofs only
//! - [`ConductorPool`]: health-aware round-robin over N clients
//!
//! Compose by wrapping: `Cache(Pool([Http, Http, …]))`. Cross-cutting
//! behaviour is never added by subclassing a transport.

pub mod breaker;
pub mod cache;
pub mod grpc;
pub mod http;
pub mod memory;
pub mod pool;

pub use breaker::{BreakerState, CircuitBreaker};
pub use cache::{CachedConductorClient, ConductorCache};
pub use grpc::GrpcConductorClient;
pub use http::HttpConductorClient;
pub use memory::InMemoryConductorClient;
pub use pool::{ConductorPool, PoolStats};

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use chorus_bridge_types::DayProofResponse;

/// An event submitted to the Conductor network for ordering
#[derive(Debug, Clone, PartialEq)]
pub struct ConductorEvent {
    pub event_type: String,
    /// Day-derived epoch; never wall-clock time
    pub epoch: u64,
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

impl ConductorEvent {
    pub fn new(event_type: impl Into<String>, epoch: u64, payload: Vec<u8>) -> Self {
        Self {
            event_type: event_type.into(),
            epoch,
            payload,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Receipt for a submitted Conductor event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConductorReceipt {
    pub event_hash: String,
    pub epoch: u64,
}

/// Conductor transport failures
#[derive(Debug, Error)]
pub enum ConductorError {
    /// Circuit breaker is open; the backend was not contacted
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// No pool member is currently healthy
    #[error("no healthy conductor backend")]
    NoHealthyBackend,

    /// Network-level failure or timeout
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success status
    #[error("conductor returned status {0}")]
    Status(u16),

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

pub type ConductorResult<T> = Result<T, ConductorError>;

/// Interface to the Conductor ordering network
#[async_trait]
pub trait ConductorClient: Send + Sync {
    /// Fetch the canonical proof for a day; `None` when the backend has none
    async fn get_day_proof(&self, day_number: u64) -> ConductorResult<Option<DayProofResponse>>;

    /// Submit one event for ordering
    async fn submit_event(&self, event: ConductorEvent) -> ConductorResult<ConductorReceipt>;

    /// Submit multiple events in one batch
    async fn submit_events_batch(
        &self,
        events: Vec<ConductorEvent>,
    ) -> ConductorResult<Vec<ConductorReceipt>>;

    /// Probe backend liveness
    async fn health_check(&self) -> bool;

    /// Release transport resources
    async fn aclose(&self);
}
