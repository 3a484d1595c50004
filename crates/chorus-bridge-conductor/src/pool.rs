//! Conductor connection pool
//!
//! Health-aware round-robin over N clients. A background loop refreshes
//! per-client health flags; a request failure provisionally marks its
//! client unhealthy until the next successful check. Each request gets up
//! to `max_retries` attempts across distinct healthy clients with
//! exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use chorus_bridge_types::DayProofResponse;

use crate::{ConductorClient, ConductorError, ConductorEvent, ConductorReceipt, ConductorResult};

struct PoolState {
    healthy: Vec<bool>,
    last_check_at: Vec<Option<Instant>>,
    usage_count: Vec<u64>,
    round_robin_index: usize,
}

/// Statistics snapshot for observability
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_clients: usize,
    pub healthy_clients: usize,
    pub total_usage: u64,
    pub client_usage: Vec<u64>,
    pub client_health: Vec<bool>,
}

/// Pool decorator over multiple [`ConductorClient`]s
pub struct ConductorPool {
    clients: Vec<Arc<dyn ConductorClient>>,
    health_check_interval: Duration,
    max_retries: u32,
    retry_delay: Duration,
    state: Mutex<PoolState>,
}

impl ConductorPool {
    pub fn new(
        clients: Vec<Arc<dyn ConductorClient>>,
        health_check_interval: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        let count = clients.len();
        Self {
            clients,
            health_check_interval,
            max_retries,
            retry_delay,
            state: Mutex::new(PoolState {
                healthy: vec![true; count],
                last_check_at: vec![None; count],
                usage_count: vec![0; count],
                round_robin_index: 0,
            }),
        }
    }

    /// Spawn the background health loop; it stops when `shutdown` flips
    pub fn start_health_loop(
        pool: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                // Jittered wake-up so pools on many bridges don't align
                let jitter = {
                    let mut rng = rand::thread_rng();
                    Duration::from_millis(rng.gen_range(0..500))
                };
                tokio::select! {
                    _ = tokio::time::sleep(pool.health_check_interval + jitter) => {
                        pool.check_all_clients_health().await;
                    }
                    _ = shutdown.changed() => {
                        debug!("conductor pool health loop stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Probe every client whose last check is stale and update flags
    pub async fn check_all_clients_health(&self) {
        for (index, client) in self.clients.iter().enumerate() {
            let stale = {
                let state = self.state.lock();
                state.last_check_at[index]
                    .map(|at| at.elapsed() >= self.health_check_interval)
                    .unwrap_or(true)
            };
            if !stale {
                continue;
            }
            let is_healthy = client.health_check().await;
            let mut state = self.state.lock();
            state.healthy[index] = is_healthy;
            state.last_check_at[index] = Some(Instant::now());
            if is_healthy {
                debug!(client = index, "conductor pool member healthy");
            } else {
                warn!(client = index, "conductor pool member unhealthy");
            }
        }
    }

    /// Next healthy client, round-robin; `None` when all are down
    fn next_healthy_client(&self) -> Option<(usize, Arc<dyn ConductorClient>)> {
        let mut state = self.state.lock();
        let healthy: Vec<usize> = (0..self.clients.len())
            .filter(|&i| state.healthy[i])
            .collect();
        if healthy.is_empty() {
            return None;
        }
        let index = healthy[state.round_robin_index % healthy.len()];
        state.round_robin_index += 1;
        state.usage_count[index] += 1;
        Some((index, self.clients[index].clone()))
    }

    fn mark_unhealthy(&self, index: usize) {
        self.state.lock().healthy[index] = false;
    }

    async fn with_failover<T, F, Fut>(&self, operation: &'static str, op: F) -> ConductorResult<T>
    where
        F: Fn(Arc<dyn ConductorClient>) -> Fut,
        Fut: Future<Output = ConductorResult<T>>,
    {
        let mut last_error = ConductorError::NoHealthyBackend;
        for attempt in 0..self.max_retries {
            let Some((index, client)) = self.next_healthy_client() else {
                error!(operation, "no healthy conductor clients available");
                return Err(ConductorError::NoHealthyBackend);
            };
            match op(client).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    warn!(operation, client = index, attempt = attempt + 1, %error,
                        "conductor pool attempt failed");
                    // Provisionally out of rotation until the next health pass
                    self.mark_unhealthy(index);
                    last_error = error;
                    if attempt + 1 < self.max_retries {
                        let backoff = self.retry_delay.mul_f64(2f64.powi(attempt as i32));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            total_clients: self.clients.len(),
            healthy_clients: state.healthy.iter().filter(|h| **h).count(),
            total_usage: state.usage_count.iter().sum(),
            client_usage: state.usage_count.clone(),
            client_health: state.healthy.clone(),
        }
    }
}

#[async_trait]
impl ConductorClient for ConductorPool {
    async fn get_day_proof(&self, day_number: u64) -> ConductorResult<Option<DayProofResponse>> {
        self.with_failover("GetDayProof", |client| async move {
            client.get_day_proof(day_number).await
        })
        .await
    }

    async fn submit_event(&self, event: ConductorEvent) -> ConductorResult<ConductorReceipt> {
        self.with_failover("SubmitEvent", |client| {
            let event = event.clone();
            async move { client.submit_event(event).await }
        })
        .await
    }

    async fn submit_events_batch(
        &self,
        events: Vec<ConductorEvent>,
    ) -> ConductorResult<Vec<ConductorReceipt>> {
        self.with_failover("SubmitEventsBatch", |client| {
            let events = events.clone();
            async move { client.submit_events_batch(events).await }
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.state.lock().healthy.iter().any(|h| *h)
    }

    async fn aclose(&self) {
        for client in &self.clients {
            client.aclose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryConductorClient;

    struct FlakyClient {
        fail: Mutex<bool>,
        calls: Mutex<u32>,
    }

    impl FlakyClient {
        fn new(fail: bool) -> Self {
            Self {
                fail: Mutex::new(fail),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ConductorClient for FlakyClient {
        async fn get_day_proof(
            &self,
            _day_number: u64,
        ) -> ConductorResult<Option<DayProofResponse>> {
            Ok(None)
        }

        async fn submit_event(&self, event: ConductorEvent) -> ConductorResult<ConductorReceipt> {
            *self.calls.lock() += 1;
            if *self.fail.lock() {
                Err(ConductorError::Transport("connection refused".to_string()))
            } else {
                Ok(ConductorReceipt {
                    event_hash: "ok".to_string(),
                    epoch: event.epoch,
                })
            }
        }

        async fn submit_events_batch(
            &self,
            _events: Vec<ConductorEvent>,
        ) -> ConductorResult<Vec<ConductorReceipt>> {
            Ok(Vec::new())
        }

        async fn health_check(&self) -> bool {
            !*self.fail.lock()
        }

        async fn aclose(&self) {}
    }

    fn event() -> ConductorEvent {
        ConductorEvent::new("federation_envelope", 1, vec![1])
    }

    #[tokio::test]
    async fn test_fails_over_to_healthy_client() {
        let bad = Arc::new(FlakyClient::new(true));
        let good = Arc::new(FlakyClient::new(false));
        let pool = ConductorPool::new(
            vec![bad.clone(), good.clone()],
            Duration::from_secs(30),
            3,
            Duration::from_millis(1),
        );
        let receipt = pool.submit_event(event()).await.unwrap();
        assert_eq!(receipt.event_hash, "ok");
        // The failing client is out of rotation after its failure
        pool.submit_event(event()).await.unwrap();
        assert_eq!(*bad.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_no_healthy_backend() {
        let pool = ConductorPool::new(
            vec![Arc::new(FlakyClient::new(true))],
            Duration::from_secs(30),
            2,
            Duration::from_millis(1),
        );
        // First call consumes the only client and marks it unhealthy
        let error = pool.submit_event(event()).await.unwrap_err();
        assert!(matches!(
            error,
            ConductorError::Transport(_) | ConductorError::NoHealthyBackend
        ));
        let error = pool.submit_event(event()).await.unwrap_err();
        assert!(matches!(error, ConductorError::NoHealthyBackend));
        assert!(!pool.health_check().await);
    }

    #[tokio::test]
    async fn test_health_pass_restores_client() {
        let flaky = Arc::new(FlakyClient::new(true));
        let pool = ConductorPool::new(
            vec![flaky.clone()],
            Duration::from_millis(0),
            1,
            Duration::from_millis(1),
        );
        let _ = pool.submit_event(event()).await;
        assert!(!pool.health_check().await);

        *flaky.fail.lock() = false;
        pool.check_all_clients_health().await;
        assert!(pool.health_check().await);
        assert!(pool.submit_event(event()).await.is_ok());
    }

    #[tokio::test]
    async fn test_round_robin_spreads_usage() {
        let a: Arc<dyn ConductorClient> = Arc::new(InMemoryConductorClient::new());
        let b: Arc<dyn ConductorClient> = Arc::new(InMemoryConductorClient::new());
        let pool = ConductorPool::new(
            vec![a, b],
            Duration::from_secs(30),
            3,
            Duration::from_millis(1),
        );
        for _ in 0..4 {
            pool.submit_event(event()).await.unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.total_usage, 4);
        assert_eq!(stats.client_usage, vec![2, 2]);
        assert_eq!(stats.healthy_clients, 2);
    }
}
