//! Chorus Bridge cryptographic primitives
//!
//! This crate provides:
//! - Envelope fingerprinting (length-prefixed BLAKE3)
//! - Ed25519 signing and verification over envelope payloads
//! - The in-memory trust store mapping instance ids to verify keys

pub mod fingerprint;
pub mod signature;
pub mod trust;

pub use fingerprint::envelope_fingerprint;
pub use signature::*;
pub use trust::TrustStore;

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid hex value for {0}")]
    InvalidHex(&'static str),

    #[error("invalid Ed25519 key for {0}")]
    InvalidKey(String),

    #[error("signature must be 64 bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("signature verification failed")]
    BadSignature,

    #[error("unknown instance '{0}'")]
    UnknownInstance(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
