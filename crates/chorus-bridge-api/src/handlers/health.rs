//! Health endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use chorus_bridge_conductor::ConductorClient;
use chorus_bridge_db::BridgeStore;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthzResponse {
    pub status: String,
    pub instance_id: String,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: String,
    pub service: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub database: bool,
    pub conductor: bool,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub service: String,
    pub checks: ReadinessChecks,
}

pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok".to_string(),
        instance_id: state.instance_id.clone(),
    })
}

/// Liveness probe: the process is up
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
        service: "chorus-bridge".to_string(),
    })
}

/// Readiness probe: 503 until the store answers
///
/// Conductor reachability is reported but non-fatal; the bridge can accept
/// work while the ordering backend recovers.
pub async fn readiness(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let database = state.store.ping().await.is_ok();
    let conductor = state.conductor.health_check().await;

    let response = ReadinessResponse {
        status: if database { "ready" } else { "not_ready" }.to_string(),
        service: "chorus-bridge".to_string(),
        checks: ReadinessChecks {
            database,
            conductor,
        },
    };
    if database {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
