//! gRPC Conductor transport
//!
//! Unary calls against the `chorus.conductor.ConductorBridge` service. The
//! client drives `tonic::client::Grpc<Channel>` directly with prost codecs
//! and static method paths, which keeps the build free of protoc codegen.

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

use chorus_bridge_proto::conductor::{
    ConductorEventBatchPb, ConductorEventPb, ConductorReceiptBatchPb, ConductorReceiptPb,
    DayProofRequestPb, DayProofResponsePb,
};
use chorus_bridge_types::DayProofResponse;

use crate::breaker::CircuitBreaker;
use crate::http::RetryPolicy;
use crate::{ConductorClient, ConductorError, ConductorEvent, ConductorReceipt, ConductorResult};

const GET_DAY_PROOF: &str = "/chorus.conductor.ConductorBridge/GetDayProof";
const SUBMIT_EVENT: &str = "/chorus.conductor.ConductorBridge/SubmitEvent";
const SUBMIT_EVENTS_BATCH: &str = "/chorus.conductor.ConductorBridge/SubmitEventsBatch";

struct HealthState {
    last_check: Option<Instant>,
    is_healthy: bool,
}

/// Conductor client over gRPC
pub struct GrpcConductorClient {
    target: String,
    grpc: tonic::client::Grpc<Channel>,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    health: Mutex<HealthState>,
}

impl GrpcConductorClient {
    /// Create a lazily-connecting client for `target` (e.g. `http://host:50051`)
    pub fn new(target: impl Into<String>, policy: RetryPolicy) -> ConductorResult<Self> {
        let target = target.into();
        let channel = Endpoint::from_shared(target.clone())
            .map_err(|e| ConductorError::Transport(e.to_string()))?
            .timeout(policy.timeout)
            .connect_timeout(policy.timeout)
            .connect_lazy();
        Ok(Self {
            grpc: tonic::client::Grpc::new(channel),
            breaker: CircuitBreaker::new(
                policy.circuit_breaker_threshold,
                policy.circuit_breaker_timeout,
            ),
            health: Mutex::new(HealthState {
                last_check: None,
                is_healthy: true,
            }),
            policy,
            target,
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> ConductorResult<Resp>
    where
        Req: prost::Message + Clone + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| ConductorError::Transport(format!("service not ready: {e}")))?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await
            .map_err(|status| match status.code() {
                tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => {
                    ConductorError::Transport(status.message().to_string())
                }
                _ => ConductorError::Status(status.code() as u16),
            })?;
        Ok(response.into_inner())
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
            warn!(operation, target = %self.target, "circuit breaker is open");
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
                    warn!(operation, attempt = attempt + 1, %error, "conductor rpc failed");
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
}

fn receipt_from_pb(receipt: ConductorReceiptPb) -> ConductorReceipt {
    ConductorReceipt {
        event_hash: receipt.event_hash,
        epoch: receipt.epoch,
    }
}

fn event_to_pb(event: &ConductorEvent) -> ConductorEventPb {
    ConductorEventPb {
        event_type: event.event_type.clone(),
        epoch: event.epoch,
        payload: event.payload.clone(),
        metadata: event.metadata.clone().into_iter().collect(),
    }
}

#[async_trait]
impl ConductorClient for GrpcConductorClient {
    async fn get_day_proof(&self, day_number: u64) -> ConductorResult<Option<DayProofResponse>> {
        let result = self
            .execute_with_retry("GetDayProof", || {
                self.unary::<DayProofRequestPb, DayProofResponsePb>(
                    GET_DAY_PROOF,
                    DayProofRequestPb { day_number },
                )
            })
            .await;
        match result {
            Ok(response) => Ok(Some(DayProofResponse {
                day_number: response.day_number,
                proof: response.proof,
                proof_hash: response.proof_hash,
                canonical: response.canonical,
                source: response.source,
            })),
            Err(ConductorError::Status(code)) if code == tonic::Code::NotFound as u16 => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn submit_event(&self, event: ConductorEvent) -> ConductorResult<ConductorReceipt> {
        let request = event_to_pb(&event);
        let receipt = self
            .execute_with_retry("SubmitEvent", || {
                self.unary::<ConductorEventPb, ConductorReceiptPb>(SUBMIT_EVENT, request.clone())
            })
            .await?;
        Ok(receipt_from_pb(receipt))
    }

    async fn submit_events_batch(
        &self,
        events: Vec<ConductorEvent>,
    ) -> ConductorResult<Vec<ConductorReceipt>> {
        let request = ConductorEventBatchPb {
            events: events.iter().map(event_to_pb).collect(),
        };
        let batch = self
            .execute_with_retry("SubmitEventsBatch", || {
                self.unary::<ConductorEventBatchPb, ConductorReceiptBatchPb>(
                    SUBMIT_EVENTS_BATCH,
                    request.clone(),
                )
            })
            .await?;
        Ok(batch.receipts.into_iter().map(receipt_from_pb).collect())
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

        // Day zero doubles as a liveness probe; NotFound still means alive
        let is_healthy = match self
            .unary::<DayProofRequestPb, DayProofResponsePb>(
                GET_DAY_PROOF,
                DayProofRequestPb { day_number: 0 },
            )
            .await
        {
            Ok(_) => true,
            Err(ConductorError::Status(code)) => code == tonic::Code::NotFound as u16,
            Err(error) => {
                warn!(%error, target = %self.target, "conductor health check failed");
                false
            }
        };
        let mut health = self.health.lock();
        health.is_healthy = is_healthy;
        health.last_check = Some(Instant::now());
        debug!(is_healthy, target = %self.target, "conductor health check");
        is_healthy
    }

    async fn aclose(&self) {
        // channels close when the last clone drops
    }
}
