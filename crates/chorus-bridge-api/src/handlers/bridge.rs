//! Bridge API handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use chorus_bridge_db::BridgeStore;
use chorus_bridge_proto::FederationEnvelope;
use chorus_bridge_types::{
    ActivityPubExportRequest, BridgeError, DayProofResponse, ModerationEventRequest,
};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct FederationSendResponse {
    pub status: String,
    pub event_hash: String,
    pub epoch: u64,
    pub fingerprint: String,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub status: String,
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct ModerationResponse {
    pub status: String,
    pub event_id: String,
    pub epoch: u64,
    pub event_hash: String,
}

fn require_instance(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("X-Chorus-Instance-Id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::from(BridgeError::InvalidEnvelope(
                "missing X-Chorus-Instance-Id header".to_string(),
            ))
        })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// `GET /api/bridge/day-proof/:day_number`
pub async fn get_day_proof(
    State(state): State<Arc<AppState>>,
    Path(day_number): Path<i64>,
) -> Result<Json<DayProofResponse>, ApiError> {
    if day_number < 0 {
        return Err(ApiError::from(BridgeError::InvalidEnvelope(
            "day_number must be non-negative".to_string(),
        )));
    }
    let proof = state.service.get_day_proof(day_number as u64).await?;
    match proof {
        Some(proof) => Ok(Json(proof)),
        None => Err(ApiError::NotFound(
            "canonical day proof unavailable".to_string(),
        )),
    }
}

/// `GET /api/bridge/federation/peers`
pub async fn get_federation_peers(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<String, String>> {
    Json(state.service.trusted_peers())
}

/// `POST /api/bridge/federation/send`
pub async fn federation_send(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<FederationSendResponse>), ApiError> {
    let stage_instance = require_instance(&headers)?;
    state.rate_limiter.check(&stage_instance)?;
    state.auth.authenticate(&headers, &stage_instance).await?;

    let envelope = match FederationEnvelope::from_bytes(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            // Caller policy here is to quarantine unparseable bytes for
            // operator review before refusing them
            if let Err(store_error) = state
                .store
                .quarantine_envelope(&body, &error.to_string())
                .await
            {
                warn!(%store_error, "failed to quarantine malformed envelope");
            }
            return Err(ApiError::from(BridgeError::InvalidEnvelope(format!(
                "undecodable federation envelope: {error}"
            ))));
        }
    };

    let idempotency_key = header_value(&headers, "Idempotency-Key");
    let (receipt, fingerprint) = state
        .service
        .process_envelope(&envelope, idempotency_key.as_deref(), &stage_instance)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(FederationSendResponse {
            status: "accepted".to_string(),
            event_hash: receipt.event_hash,
            epoch: receipt.epoch,
            fingerprint,
        }),
    ))
}

/// `POST /api/bridge/export`
pub async fn activitypub_export(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ActivityPubExportRequest>,
) -> Result<(StatusCode, Json<ExportResponse>), ApiError> {
    let stage_instance = require_instance(&headers)?;
    state.rate_limiter.check(&stage_instance)?;
    state.auth.authenticate(&headers, &stage_instance).await?;

    let job_id = state
        .service
        .queue_activitypub_export(&payload, &stage_instance)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ExportResponse {
            status: "queued".to_string(),
            job_id,
        }),
    ))
}

/// `POST /api/bridge/moderation/event`
pub async fn moderation_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ModerationEventRequest>,
) -> Result<(StatusCode, Json<ModerationResponse>), ApiError> {
    let stage_instance = require_instance(&headers)?;
    state.rate_limiter.check(&stage_instance)?;
    state.auth.authenticate(&headers, &stage_instance).await?;

    let (event_id, receipt) = state
        .service
        .record_moderation_event(&payload, &stage_instance)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ModerationResponse {
            status: "accepted".to_string(),
            event_id,
            epoch: receipt.epoch,
            event_hash: receipt.event_hash,
        }),
    ))
}
