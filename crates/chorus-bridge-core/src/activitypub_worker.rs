//! ActivityPub delivery worker
//!
//! Drains the export ledger: rebuilds each Note from the stored export
//! request and POSTs it to the target inbox as `application/activity+json`.
//! Retry shape matches the outbound federation worker.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{error, info, warn};

use prost::Message as _;

use chorus_bridge_db::{BridgeStore, ExportLedgerRow};
use chorus_bridge_proto::PostAnnouncement;
use chorus_bridge_types::{ActivityPubExportRequest, BridgeConfig, BridgeError, BridgeResult};

use crate::outbound_worker::{next_retry_at, unix_now};
use crate::translator::ActivityPubTranslator;

const CLAIM_BATCH: i64 = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Background worker delivering ActivityPub exports
pub struct ActivityPubDeliveryWorker {
    store: Arc<dyn BridgeStore>,
    translator: ActivityPubTranslator,
    client: reqwest::Client,
    interval: Duration,
    max_retries: u32,
    retry_delay: i64,
}

impl ActivityPubDeliveryWorker {
    pub fn new(config: &BridgeConfig, store: Arc<dyn BridgeStore>) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Config(format!("activitypub http client: {e}")))?;
        Ok(Self {
            store,
            translator: ActivityPubTranslator::new(
                config.export_genesis_timestamp,
                config.activitypub_actor_domain.clone(),
            ),
            client,
            interval: Duration::from_secs(config.activitypub_worker_interval_seconds),
            max_retries: config.activitypub_max_retries,
            retry_delay: config.activitypub_retry_delay_seconds,
        })
    }

    /// Worker loop; exits when `shutdown` flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("activitypub delivery worker started");
        loop {
            let jitter = {
                let mut rng = rand::thread_rng();
                Duration::from_millis(rng.gen_range(0..250))
            };
            tokio::select! {
                _ = tokio::time::sleep(self.interval + jitter) => {
                    if let Err(error) = self.process_due().await {
                        error!(%error, "activitypub delivery worker tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("activitypub delivery worker stopping");
                    break;
                }
            }
        }
    }

    /// Drain one batch of due export rows
    pub async fn process_due(&self) -> BridgeResult<()> {
        let rows = self
            .store
            .claim_due_exports(CLAIM_BATCH)
            .await
            .map_err(|e| BridgeError::Store(e.to_string()))?;
        for row in rows {
            match self.deliver_export(&row).await {
                Ok(()) => {
                    self.store
                        .mark_export_delivered(&row.id)
                        .await
                        .map_err(|e| BridgeError::Store(e.to_string()))?;
                    info!(job_id = %row.id, target = %row.target_url, "activitypub export delivered");
                }
                Err(error) => {
                    warn!(job_id = %row.id, %error, "activitypub delivery attempt failed");
                    self.handle_failure(&row).await?;
                }
            }
        }
        Ok(())
    }

    async fn deliver_export(&self, row: &ExportLedgerRow) -> BridgeResult<()> {
        let request: ActivityPubExportRequest = serde_json::from_slice(&row.raw_payload)
            .map_err(|e| BridgeError::Transport(format!("stored export payload undecodable: {e}")))?;
        let post_bytes = hex::decode(&request.chorus_post)
            .map_err(|e| BridgeError::Transport(format!("stored chorus_post undecodable: {e}")))?;
        let post = PostAnnouncement::decode(post_bytes.as_slice())
            .map_err(|e| BridgeError::Transport(format!("stored chorus_post undecodable: {e}")))?;

        let (note, _) = self.translator.build_note(&post, &request.body_md);

        let response = self
            .client
            .post(&row.target_url)
            .header("Content-Type", "application/activity+json")
            .header("Accept", "application/activity+json")
            .json(&note)
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

    async fn handle_failure(&self, row: &ExportLedgerRow) -> BridgeResult<()> {
        let attempts = row.attempts + 1;
        if attempts <= self.max_retries as i32 {
            let retry_at = next_retry_at(unix_now(), self.retry_delay, attempts);
            self.store
                .mark_export_retry(&row.id, attempts, retry_at)
                .await
                .map_err(|e| BridgeError::Store(e.to_string()))?;
            warn!(job_id = %row.id, attempts, retry_at, "activitypub export scheduled for retry");
        } else {
            self.store
                .mark_export_failed(&row.id)
                .await
                .map_err(|e| BridgeError::Store(e.to_string()))?;
            error!(job_id = %row.id, attempts, "activitypub export failed permanently");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use chorus_bridge_db::{MemoryStore, NewExport};
    use std::sync::Mutex;

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            instance_id: "bridge-test".to_string(),
            database_url: "postgresql://localhost/bridge".to_string(),
            activitypub_actor_domain: "bridge.chorus.social".to_string(),
            export_genesis_timestamp: 1_729_670_400,
            activitypub_max_retries: 3,
            activitypub_retry_delay_seconds: 60,
            ..Default::default()
        }
    }

    fn export_post() -> PostAnnouncement {
        PostAnnouncement {
            post_id: vec![0xde, 0xad, 0xbe, 0xef],
            author_pubkey: vec![7u8; 32],
            content_hash: vec![1, 2, 3],
            order_index: 1,
            creation_day: 2,
        }
    }

    async fn enqueue_export(store: &MemoryStore, target_url: &str) -> String {
        let request = ActivityPubExportRequest {
            chorus_post: hex::encode(export_post().encode_to_vec()),
            body_md: "Hello Chorus".to_string(),
            signature: vec![0u8; 64],
        };
        store
            .enqueue_export(NewExport {
                stage_instance: "stage-a".to_string(),
                object_hash: hex::encode([0xde, 0xad, 0xbe, 0xef]),
                ap_type: "Note".to_string(),
                target_url: target_url.to_string(),
                published_ts: 0,
                raw_payload: serde_json::to_vec(&request).unwrap(),
            })
            .await
            .unwrap()
    }

    async fn spawn_inbox(notes: Arc<Mutex<Vec<serde_json::Value>>>) -> String {
        let app = Router::new().route(
            "/inbox",
            post(move |Json(note): Json<serde_json::Value>| {
                let notes = notes.clone();
                async move {
                    notes.lock().unwrap().push(note);
                    axum::http::StatusCode::OK
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/inbox")
    }

    #[tokio::test]
    async fn test_export_delivery_builds_expected_note() {
        let store = Arc::new(MemoryStore::new());
        let notes = Arc::new(Mutex::new(Vec::new()));
        let target = spawn_inbox(notes.clone()).await;
        let job_id = enqueue_export(&store, &target).await;

        let config = test_config();
        let worker = ActivityPubDeliveryWorker::new(&config, store.clone()).unwrap();
        worker.process_due().await.unwrap();

        let row = store.get_export(&job_id).await.unwrap().unwrap();
        assert_eq!(row.status, "delivered");

        let received = notes.lock().unwrap();
        assert_eq!(received.len(), 1);
        let note = &received[0];
        assert_eq!(note["type"], "Note");
        assert_eq!(note["content"], "Hello Chorus");
        // attributedTo is the truncated SHA-256 of the author key
        let translator = ActivityPubTranslator::new(1_729_670_400, "bridge.chorus.social");
        assert_eq!(note["attributedTo"], translator.actor_uri(&[7u8; 32]));
        // published is the deterministic day-window stamp
        let expected_ts =
            translator.derive_publish_timestamp(2, &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(
            note["published"],
            chrono::DateTime::from_timestamp(expected_ts, 0).unwrap().to_rfc3339()
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_retries_then_fails() {
        let store = Arc::new(MemoryStore::new());
        let job_id = enqueue_export(&store, "http://127.0.0.1:9/inbox").await;

        let mut config = test_config();
        config.activitypub_max_retries = 1;
        let worker = ActivityPubDeliveryWorker::new(&config, store.clone()).unwrap();

        worker.process_due().await.unwrap();
        let row = store.get_export(&job_id).await.unwrap().unwrap();
        assert_eq!(row.status, "retrying");
        assert_eq!(row.attempts, 1);

        // Force the retry due now, then exhaust the budget
        store.mark_export_retry(&job_id, 1, 0).await.unwrap();
        worker.process_due().await.unwrap();
        let row = store.get_export(&job_id).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
    }
}
