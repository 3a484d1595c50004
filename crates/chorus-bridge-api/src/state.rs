//! Application state shared across handlers

use std::sync::Arc;

use chorus_bridge_conductor::ConductorClient;
use chorus_bridge_core::BridgeService;
use chorus_bridge_db::BridgeStore;
use chorus_bridge_types::BridgeResult;

use crate::auth::JwtAuthenticator;
use crate::rate_limit::RateLimiter;

/// Shared application state
pub struct AppState {
    pub service: Arc<BridgeService>,
    pub store: Arc<dyn BridgeStore>,
    pub conductor: Arc<dyn ConductorClient>,
    pub auth: JwtAuthenticator,
    pub rate_limiter: RateLimiter,
    pub instance_id: String,
}

impl AppState {
    pub fn new(
        service: Arc<BridgeService>,
        conductor: Arc<dyn ConductorClient>,
    ) -> BridgeResult<Self> {
        let config = service.config();
        let store = service.store();
        let auth = JwtAuthenticator::new(config, store.clone())?;
        let rate_limiter = RateLimiter::new(
            config.federation_rate_limits_default_rps,
            config.federation_rate_limits_burst,
        );
        Ok(Self {
            instance_id: config.instance_id.clone(),
            store,
            auth,
            rate_limiter,
            service,
            conductor,
        })
    }
}
