//! Chorus Bridge HTTP edge
//!
//! Thin request handlers over [`chorus_bridge_core::BridgeService`]: decode,
//! authenticate (EdDSA JWT with JTI replay protection), rate-limit, then
//! hand work to the pipeline. Error kinds map 1:1 to HTTP statuses.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use auth::JwtAuthenticator;
pub use error::ApiError;
pub use rate_limit::RateLimiter;
pub use routes::api_router;
pub use state::AppState;
