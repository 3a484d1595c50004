//! Route table

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the bridge's HTTP surface
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/bridge/day-proof/:day_number",
            get(handlers::bridge::get_day_proof),
        )
        .route(
            "/api/bridge/federation/peers",
            get(handlers::bridge::get_federation_peers),
        )
        .route(
            "/api/bridge/federation/send",
            post(handlers::bridge::federation_send),
        )
        .route("/api/bridge/export", post(handlers::bridge::activitypub_export))
        .route(
            "/api/bridge/moderation/event",
            post(handlers::bridge::moderation_event),
        )
        .route("/healthz", get(handlers::health::healthz))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
