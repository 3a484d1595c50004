//! Bridge error taxonomy
//!
//! Every failure the pipeline or the edge can surface maps onto one of these
//! kinds. The HTTP layer translates them 1:1 to status codes; workers keep
//! `Transport` failures on the ledger row and never surface them upstream.

use thiserror::Error;

/// Errors surfaced by the bridge pipeline and its collaborators
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed envelope bytes, unreadable fields, or a missing epoch
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Sender instance is not present in the trust store
    #[error("unknown instance '{0}'")]
    UnknownInstance(String),

    /// Ed25519 signature did not verify against the sender's key
    #[error("signature verification failed")]
    SignatureInvalid,

    /// Envelope fingerprint already present in the replay cache
    #[error("duplicate federation envelope: {0}")]
    DuplicateEnvelope(String),

    /// Idempotency key already processed for this instance
    #[error("duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    /// Bearer token missing, invalid, or replayed
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Per-instance request window exceeded
    #[error("rate limit exceeded")]
    RateLimited,

    /// Conductor circuit open or no healthy pool member
    #[error("conductor unavailable: {0}")]
    BackendUnavailable(String),

    /// Recoverable remote failure inside a delivery worker
    #[error("transport error: {0}")]
    Transport(String),

    /// Ledger row exhausted its retry budget
    #[error("delivery permanently failed: {0}")]
    Fatal(String),

    /// Persistence failure
    #[error("store error: {0}")]
    Store(String),

    /// Invalid or missing configuration; aborts startup
    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Stable machine-readable code for API responses and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidEnvelope(_) => "INVALID_ENVELOPE",
            Self::UnknownInstance(_) => "UNKNOWN_INSTANCE",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::DuplicateEnvelope(_) => "DUPLICATE_ENVELOPE",
            Self::DuplicateIdempotencyKey(_) => "DUPLICATE_IDEMPOTENCY_KEY",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::RateLimited => "RATE_LIMITED",
            Self::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Fatal(_) => "DELIVERY_FAILED",
            Self::Store(_) => "STORE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            BridgeError::DuplicateEnvelope("fp".into()).error_code(),
            "DUPLICATE_ENVELOPE"
        );
        assert_eq!(BridgeError::RateLimited.error_code(), "RATE_LIMITED");
    }
}
