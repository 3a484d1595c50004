//! HTTP Conductor transport
//!
//! JSON over the Conductor REST surface: `POST /events`,
//! `POST /events/batch`, `GET /day-proof/{n}`, `GET /health`. Every call
//! runs through retry-with-backoff behind the per-client circuit breaker.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chorus_bridge_types::DayProofResponse;

use crate::breaker::CircuitBreaker;
use crate::{ConductorClient, ConductorError, ConductorEvent, ConductorReceipt, ConductorResult};

#[derive(Serialize)]
struct EventBody<'a> {
    event_type: &'a str,
    epoch: u64,
    payload_b64: String,
    metadata: &'a HashMap<String, String>,
}

#[derive(Deserialize)]
struct ReceiptBody {
    event_hash: String,
    epoch: u64,
}

/// Tuning knobs shared by the remote transports
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

struct HealthState {
    last_check: Option<Instant>,
    is_healthy: bool,
}

/// Conductor client over HTTP/JSON
pub struct HttpConductorClient {
    base_url: String,
    client: reqwest::Client,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    health: Mutex<HealthState>,
}

impl HttpConductorClient {
    pub fn new(base_url: impl Into<String>, policy: RetryPolicy) -> ConductorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .build()
            .map_err(|e| ConductorError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            breaker: CircuitBreaker::new(
                policy.circuit_breaker_threshold,
                policy.circuit_breaker_timeout,
            ),
            health: Mutex::new(HealthState {
                last_check: None,
                is_healthy: true,
            }),
            policy,
        })
    }

    async fn execute_with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut op: F,
    ) -> ConductorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConductorResult<T>>,
    {
        if !self.breaker.can_execute() {
            warn!(operation, "circuit breaker is open");
            return Err(ConductorError::CircuitOpen);
        }

        let mut last_error = ConductorError::Transport("no attempt made".to_string());
        for attempt in 0..=self.policy.max_retries {
            match op().await {
                Ok(value) => {
                    self.breaker.on_success();
                    return Ok(value);
                }
                Err(error) => {
                    warn!(operation, attempt = attempt + 1, %error, "conductor request failed");
                    last_error = error;
                    if attempt < self.policy.max_retries {
                        let backoff = self.policy.retry_delay.mul_f64(2f64.powi(attempt as i32));
                        tokio::time::sleep(backoff).await;
                    } else {
                        self.breaker.on_failure();
                    }
                }
            }
        }
        Err(last_error)
    }

    fn check_status(response: &reqwest::Response) -> ConductorResult<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ConductorError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl ConductorClient for HttpConductorClient {
    async fn get_day_proof(&self, day_number: u64) -> ConductorResult<Option<DayProofResponse>> {
        let url = format!("{}/day-proof/{day_number}", self.base_url);
        self.execute_with_retry("GetDayProof", || {
            let url = url.clone();
            async move {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| ConductorError::Transport(e.to_string()))?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                Self::check_status(&response)?;
                let proof: DayProofResponse = response
                    .json()
                    .await
                    .map_err(|e| ConductorError::Decode(e.to_string()))?;
                Ok(Some(proof))
            }
        })
        .await
    }

    async fn submit_event(&self, event: ConductorEvent) -> ConductorResult<ConductorReceipt> {
        let url = format!("{}/events", self.base_url);
        self.execute_with_retry("SubmitEvent", || {
            let url = url.clone();
            let event = event.clone();
            async move {
                let body = EventBody {
                    event_type: &event.event_type,
                    epoch: event.epoch,
                    payload_b64: BASE64.encode(&event.payload),
                    metadata: &event.metadata,
                };
                let response = self
                    .client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| ConductorError::Transport(e.to_string()))?;
                Self::check_status(&response)?;
                let receipt: ReceiptBody = response
                    .json()
                    .await
                    .map_err(|e| ConductorError::Decode(e.to_string()))?;
                Ok(ConductorReceipt {
                    event_hash: receipt.event_hash,
                    epoch: receipt.epoch,
                })
            }
        })
        .await
    }

    async fn submit_events_batch(
        &self,
        events: Vec<ConductorEvent>,
    ) -> ConductorResult<Vec<ConductorReceipt>> {
        let url = format!("{}/events/batch", self.base_url);
        self.execute_with_retry("SubmitEventsBatch", || {
            let url = url.clone();
            let events = events.clone();
            async move {
                let bodies: Vec<EventBody<'_>> = events
                    .iter()
                    .map(|event| EventBody {
                        event_type: &event.event_type,
                        epoch: event.epoch,
                        payload_b64: BASE64.encode(&event.payload),
                        metadata: &event.metadata,
                    })
                    .collect();
                let response = self
                    .client
                    .post(&url)
                    .json(&bodies)
                    .send()
                    .await
                    .map_err(|e| ConductorError::Transport(e.to_string()))?;
                Self::check_status(&response)?;
                let receipts: Vec<ReceiptBody> = response
                    .json()
                    .await
                    .map_err(|e| ConductorError::Decode(e.to_string()))?;
                Ok(receipts
                    .into_iter()
                    .map(|r| ConductorReceipt {
                        event_hash: r.event_hash,
                        epoch: r.epoch,
                    })
                    .collect())
            }
        })
        .await
    }

    async fn health_check(&self) -> bool {
        {
            let health = self.health.lock();
            if let Some(last) = health.last_check {
                if last.elapsed() < self.policy.health_check_interval {
                    return health.is_healthy;
                }
            }
        }

        let url = format!("{}/health", self.base_url);
        let is_healthy = match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                warn!(%error, "conductor health check failed");
                false
            }
        };
        let mut health = self.health.lock();
        health.is_healthy = is_healthy;
        health.last_check = Some(Instant::now());
        debug!(is_healthy, "conductor health check");
        is_healthy
    }

    async fn aclose(&self) {
        // reqwest clients release their connections on drop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_retries: u32, breaker_threshold: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
            circuit_breaker_threshold: breaker_threshold,
            circuit_breaker_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(30),
        }
    }

    fn event() -> ConductorEvent {
        ConductorEvent::new("federation_envelope", 1, vec![1, 2, 3])
    }

    #[tokio::test]
    async fn test_breaker_opens_after_consecutive_failures() {
        // Nothing listens on the discard port: every attempt is refused
        let client =
            HttpConductorClient::new("http://127.0.0.1:9", fast_policy(0, 3)).unwrap();

        for _ in 0..3 {
            let error = client.submit_event(event()).await.unwrap_err();
            assert!(matches!(error, ConductorError::Transport(_)));
        }

        // The fourth call short-circuits without touching the network
        let error = client.submit_event(event()).await.unwrap_err();
        assert!(matches!(error, ConductorError::CircuitOpen));
    }

    #[tokio::test]
    async fn test_health_check_result_is_cached_within_interval() {
        let client =
            HttpConductorClient::new("http://127.0.0.1:9", fast_policy(0, 100)).unwrap();
        assert!(!client.health_check().await);
        // Second probe inside the interval reuses the cached verdict
        assert!(!client.health_check().await);
    }
}
