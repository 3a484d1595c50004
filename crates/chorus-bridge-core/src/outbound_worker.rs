//! Outbound federation worker
//!
//! Periodically drains the outbound ledger and pushes envelopes to other
//! Stage instances. This is the attestation boundary: stored envelopes
//! carry an empty signature, and each attempt re-signs `message_data` with
//! the bridge's own key, so the outbound envelope authenticates the bridge
//! rather than the originating Stage.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use chorus_bridge_crypto::{sign_payload, signing_key_from_hex};
use chorus_bridge_db::{BridgeStore, OutboundLedgerRow};
use chorus_bridge_proto::FederationEnvelope;
use chorus_bridge_types::{BridgeConfig, BridgeError, BridgeResult};

const CLAIM_BATCH: i64 = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Bounded exponential backoff: `base * 2^attempts` seconds
pub(crate) fn next_retry_at(now: i64, base_delay: i64, attempts: i32) -> i64 {
    now + base_delay.saturating_mul(1i64 << attempts.min(32))
}

#[derive(Serialize)]
struct OutboundClaims<'a> {
    iss: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
}

/// Background worker pushing outbound federation messages to target Stages
pub struct OutboundFederationWorker {
    store: Arc<dyn BridgeStore>,
    client: reqwest::Client,
    instance_id: String,
    interval: Duration,
    max_retries: u32,
    retry_delay: i64,
    signing_key: Option<SigningKey>,
    jwt_key: Option<EncodingKey>,
}

impl OutboundFederationWorker {
    pub fn new(config: &BridgeConfig, store: Arc<dyn BridgeStore>) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Config(format!("outbound http client: {e}")))?;

        let signing_key = match &config.bridge_private_key {
            Some(hex_key) => Some(
                signing_key_from_hex(hex_key, "bridge_private_key")
                    .map_err(|e| BridgeError::Config(format!("invalid bridge_private_key: {e}")))?,
            ),
            None => {
                warn!("bridge_private_key not configured, outbound envelopes will not be signed");
                None
            }
        };

        let jwt_key = match &config.bridge_jwt_signing_key {
            Some(hex_key) => {
                let key = signing_key_from_hex(hex_key, "bridge_jwt_signing_key").map_err(|e| {
                    BridgeError::Config(format!("invalid bridge_jwt_signing_key: {e}"))
                })?;
                let document = key.to_pkcs8_der().map_err(|e| {
                    BridgeError::Config(format!("bridge_jwt_signing_key pkcs8: {e}"))
                })?;
                Some(EncodingKey::from_ed_der(document.as_bytes()))
            }
            None => {
                warn!("bridge_jwt_signing_key not configured, outbound requests carry no JWT");
                None
            }
        };

        Ok(Self {
            store,
            client,
            instance_id: config.instance_id.clone(),
            interval: Duration::from_secs(config.outbound_worker_interval_seconds),
            max_retries: config.outbound_max_retries,
            retry_delay: config.outbound_retry_delay_seconds,
            signing_key,
            jwt_key,
        })
    }

    /// Worker loop; exits when `shutdown` flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("outbound federation worker started");
        loop {
            let jitter = {
                let mut rng = rand::thread_rng();
                Duration::from_millis(rng.gen_range(0..250))
            };
            tokio::select! {
                _ = tokio::time::sleep(self.interval + jitter) => {
                    if let Err(error) = self.process_due().await {
                        error!(%error, "outbound federation worker tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("outbound federation worker stopping");
                    break;
                }
            }
        }
    }

    /// Drain one batch of due ledger rows
    pub async fn process_due(&self) -> BridgeResult<()> {
        let rows = self
            .store
            .claim_due_outbound(CLAIM_BATCH)
            .await
            .map_err(|e| BridgeError::Store(e.to_string()))?;
        for row in rows {
            match self.send_message(&row).await {
                Ok(()) => {
                    self.store
                        .mark_outbound_delivered(&row.id)
                        .await
                        .map_err(|e| BridgeError::Store(e.to_string()))?;
                    info!(job_id = %row.id, target = %row.target_instance_url, "outbound message delivered");
                }
                Err(error) => {
                    warn!(job_id = %row.id, %error, "outbound delivery attempt failed");
                    self.handle_failure(&row).await?;
                }
            }
        }
        Ok(())
    }

    fn sign_envelope(&self, mut envelope: FederationEnvelope) -> FederationEnvelope {
        match &self.signing_key {
            Some(key) => {
                envelope.signature = sign_payload(&envelope.message_data, key);
                envelope
            }
            None => envelope,
        }
    }

    fn build_jwt(&self, target_instance: &str) -> Option<String> {
        let key = self.jwt_key.as_ref()?;
        let now = unix_now();
        let claims = OutboundClaims {
            iss: &self.instance_id,
            aud: target_instance,
            iat: now,
            exp: now + 300,
            jti: Uuid::new_v4().to_string(),
        };
        match jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), &claims, key) {
            Ok(token) => Some(token),
            Err(error) => {
                error!(%error, "failed to mint outbound JWT");
                None
            }
        }
    }

    async fn send_message(&self, row: &OutboundLedgerRow) -> BridgeResult<()> {
        let envelope = FederationEnvelope::from_bytes(&row.raw_envelope)
            .map_err(|e| BridgeError::Transport(format!("stored envelope undecodable: {e}")))?;
        let signed = self.sign_envelope(envelope);

        let url = format!("{}/api/bridge/federation/send", row.target_instance_url);
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .header("X-Chorus-Instance-Id", &self.instance_id)
            .header("Idempotency-Key", Uuid::new_v4().to_string())
            .body(signed.to_bytes());
        if let Some(token) = self.build_jwt(&row.target_instance_url) {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BridgeError::Transport(format!(
                "target returned status {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    async fn handle_failure(&self, row: &OutboundLedgerRow) -> BridgeResult<()> {
        let attempts = row.attempts + 1;
        if attempts <= self.max_retries as i32 {
            let retry_at = next_retry_at(unix_now(), self.retry_delay, attempts);
            self.store
                .mark_outbound_retry(&row.id, attempts, retry_at)
                .await
                .map_err(|e| BridgeError::Store(e.to_string()))?;
            warn!(job_id = %row.id, attempts, retry_at, "outbound message scheduled for retry");
        } else {
            self.store
                .mark_outbound_failed(&row.id)
                .await
                .map_err(|e| BridgeError::Store(e.to_string()))?;
            error!(job_id = %row.id, attempts, "outbound message failed permanently");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::Router;
    use chorus_bridge_crypto::verify_signature;
    use chorus_bridge_db::MemoryStore;
    use rand::rngs::OsRng;
    use std::sync::Mutex;

    fn worker_config(bridge_key: &SigningKey, jwt_key: &SigningKey) -> BridgeConfig {
        BridgeConfig {
            instance_id: "bridge-test".to_string(),
            database_url: "postgresql://localhost/bridge".to_string(),
            bridge_private_key: Some(hex::encode(bridge_key.to_bytes())),
            bridge_jwt_signing_key: Some(hex::encode(jwt_key.to_bytes())),
            outbound_max_retries: 2,
            outbound_retry_delay_seconds: 60,
            ..Default::default()
        }
    }

    fn queued_envelope() -> Vec<u8> {
        FederationEnvelope {
            sender_instance: "stage-a".to_string(),
            nonce: 7,
            message_type: "PostAnnouncement".to_string(),
            message_data: b"inner message".to_vec(),
            signature: Vec::new(),
        }
        .to_bytes()
    }

    #[derive(Default)]
    struct Captured {
        body: Vec<u8>,
        headers: Vec<(String, String)>,
    }

    async fn spawn_stub(captured: Arc<Mutex<Captured>>) -> String {
        let app = Router::new().route(
            "/api/bridge/federation/send",
            post(move |headers: HeaderMap, body: Bytes| {
                let captured = captured.clone();
                async move {
                    let mut slot = captured.lock().unwrap();
                    slot.body = body.to_vec();
                    slot.headers = headers
                        .iter()
                        .map(|(k, v)| {
                            (k.to_string(), v.to_str().unwrap_or_default().to_string())
                        })
                        .collect();
                    axum::http::StatusCode::ACCEPTED
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_delivery_resigns_and_marks_delivered() {
        let bridge_key = SigningKey::generate(&mut OsRng);
        let jwt_key = SigningKey::generate(&mut OsRng);
        let store = Arc::new(MemoryStore::new());
        let captured = Arc::new(Mutex::new(Captured::default()));
        let target = spawn_stub(captured.clone()).await;

        let job_id = store
            .enqueue_outbound(&target, "PostAnnouncement", &queued_envelope())
            .await
            .unwrap();

        let worker =
            OutboundFederationWorker::new(&worker_config(&bridge_key, &jwt_key), store.clone())
                .unwrap();
        worker.process_due().await.unwrap();

        let row = store.get_outbound(&job_id).await.unwrap().unwrap();
        assert_eq!(row.status, "delivered");

        let slot = captured.lock().unwrap();
        let sent = FederationEnvelope::from_bytes(&slot.body).unwrap();
        // The bridge key attested the message, replacing the empty signature
        verify_signature(&sent.message_data, &sent.signature, &bridge_key.verifying_key())
            .unwrap();
        let header_names: Vec<&str> = slot.headers.iter().map(|(k, _)| k.as_str()).collect();
        assert!(header_names.contains(&"x-chorus-instance-id"));
        assert!(header_names.contains(&"idempotency-key"));
        assert!(header_names.contains(&"authorization"));
    }

    #[tokio::test]
    async fn test_failed_attempt_schedules_retry_with_backoff() {
        let bridge_key = SigningKey::generate(&mut OsRng);
        let jwt_key = SigningKey::generate(&mut OsRng);
        let store = Arc::new(MemoryStore::new());

        // Nothing listens here: connection refused on every attempt
        let job_id = store
            .enqueue_outbound("http://127.0.0.1:9", "PostAnnouncement", &queued_envelope())
            .await
            .unwrap();

        let worker =
            OutboundFederationWorker::new(&worker_config(&bridge_key, &jwt_key), store.clone())
                .unwrap();
        let before = unix_now();
        worker.process_due().await.unwrap();

        let row = store.get_outbound(&job_id).await.unwrap().unwrap();
        assert_eq!(row.status, "retrying");
        assert_eq!(row.attempts, 1);
        assert!(row.retry_at >= before + 60 * 2);
        assert!(row.retry_at <= unix_now() + 60 * 2 + 5);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_terminally() {
        let bridge_key = SigningKey::generate(&mut OsRng);
        let jwt_key = SigningKey::generate(&mut OsRng);
        let mut config = worker_config(&bridge_key, &jwt_key);
        config.outbound_max_retries = 0;
        let store = Arc::new(MemoryStore::new());

        let job_id = store
            .enqueue_outbound("http://127.0.0.1:9", "PostAnnouncement", &queued_envelope())
            .await
            .unwrap();

        let worker = OutboundFederationWorker::new(&config, store.clone()).unwrap();
        worker.process_due().await.unwrap();

        let row = store.get_outbound(&job_id).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        // Terminal rows are never claimed again
        assert!(store.claim_due_outbound(10).await.unwrap().is_empty());
    }

    #[test]
    fn test_backoff_schedule_is_bounded() {
        let base = 60;
        let mut previous = next_retry_at(0, base, 1);
        for attempts in 2..=6 {
            let next = next_retry_at(0, base, attempts);
            assert!(next - previous <= base * (1 << 6));
            previous = next;
        }
        assert_eq!(next_retry_at(100, 60, 1), 100 + 120);
        assert_eq!(next_retry_at(100, 60, 3), 100 + 480);
    }

    #[tokio::test]
    async fn test_invalid_bridge_key_fails_construction() {
        let store: Arc<dyn BridgeStore> = Arc::new(MemoryStore::new());
        let config = BridgeConfig {
            bridge_private_key: Some("not-hex".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            OutboundFederationWorker::new(&config, store),
            Err(BridgeError::Config(_))
        ));
    }
}
