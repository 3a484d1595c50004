//! Day-proof response cache
//!
//! Only `get_day_proof` responses are cached; day proofs are immutable once
//! canonical, so the default TTL is one hour. Submissions are never cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use chorus_bridge_types::DayProofResponse;

use crate::{ConductorClient, ConductorEvent, ConductorReceipt, ConductorResult};

struct CacheEntry {
    value: DayProofResponse,
    inserted_at: Instant,
    ttl: Duration,
    /// Recency stamp for LRU eviction
    last_access: u64,
}

struct CacheInner {
    entries: HashMap<u64, CacheEntry>,
    access_counter: u64,
}

/// Bounded LRU+TTL cache keyed by day number
pub struct ConductorCache {
    default_ttl: Duration,
    max_size: usize,
    inner: Mutex<CacheInner>,
}

impl ConductorCache {
    pub fn new(default_ttl: Duration, max_size: usize) -> Self {
        Self {
            default_ttl,
            max_size,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                access_counter: 0,
            }),
        }
    }

    pub fn get(&self, day_number: u64) -> Option<DayProofResponse> {
        let mut inner = self.inner.lock();
        inner.access_counter += 1;
        let stamp = inner.access_counter;
        match inner.entries.get_mut(&day_number) {
            Some(entry) => {
                if entry.inserted_at.elapsed() > entry.ttl {
                    inner.entries.remove(&day_number);
                    return None;
                }
                entry.last_access = stamp;
                Some(entry.value.clone())
            }
            None => None,
        }
    }

    pub fn set(&self, day_number: u64, value: DayProofResponse) {
        let mut inner = self.inner.lock();
        inner.access_counter += 1;
        let stamp = inner.access_counter;
        if inner.entries.len() >= self.max_size && !inner.entries.contains_key(&day_number) {
            // True-LRU eviction: drop the least recently accessed entry
            if let Some(&oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(day, _)| day)
            {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(
            day_number,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl: self.default_ttl,
                last_access: stamp,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}

/// Decorator adding the day-proof cache to any [`ConductorClient`]
pub struct CachedConductorClient {
    client: Arc<dyn ConductorClient>,
    cache: ConductorCache,
}

impl CachedConductorClient {
    pub fn new(client: Arc<dyn ConductorClient>, cache: ConductorCache) -> Self {
        Self { client, cache }
    }
}

#[async_trait]
impl ConductorClient for CachedConductorClient {
    async fn get_day_proof(&self, day_number: u64) -> ConductorResult<Option<DayProofResponse>> {
        if let Some(hit) = self.cache.get(day_number) {
            debug!(day_number, "day proof cache hit");
            return Ok(Some(hit));
        }
        let result = self.client.get_day_proof(day_number).await?;
        if let Some(proof) = &result {
            self.cache.set(day_number, proof.clone());
            debug!(day_number, "day proof cached");
        }
        Ok(result)
    }

    async fn submit_event(&self, event: ConductorEvent) -> ConductorResult<ConductorReceipt> {
        self.client.submit_event(event).await
    }

    async fn submit_events_batch(
        &self,
        events: Vec<ConductorEvent>,
    ) -> ConductorResult<Vec<ConductorReceipt>> {
        self.client.submit_events_batch(events).await
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await
    }

    async fn aclose(&self) {
        self.client.aclose().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryConductorClient;

    fn proof(day: u64) -> DayProofResponse {
        DayProofResponse {
            day_number: day,
            proof: format!("p{day}"),
            proof_hash: format!("h{day}"),
            canonical: true,
            source: "test".to_string(),
        }
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let cache = ConductorCache::new(Duration::from_secs(60), 3);
        cache.set(1, proof(1));
        cache.set(2, proof(2));
        cache.set(3, proof(3));
        // Touch 1 and 3 so 2 becomes the least recently accessed
        cache.get(1);
        cache.get(3);
        cache.set(4, proof(4));
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
        assert!(cache.get(4).is_some());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_expired_entries_miss() {
        let cache = ConductorCache::new(Duration::from_millis(0), 10);
        cache.set(1, proof(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = ConductorCache::new(Duration::from_secs(60), 2);
        cache.set(1, proof(1));
        cache.set(2, proof(2));
        cache.set(2, proof(2));
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_some());
    }

    #[tokio::test]
    async fn test_cached_client_serves_second_read_from_cache() {
        struct CountingClient {
            inner: InMemoryConductorClient,
            calls: Mutex<u32>,
        }

        #[async_trait]
        impl ConductorClient for CountingClient {
            async fn get_day_proof(
                &self,
                day_number: u64,
            ) -> ConductorResult<Option<DayProofResponse>> {
                *self.calls.lock() += 1;
                self.inner.get_day_proof(day_number).await
            }
            async fn submit_event(
                &self,
                event: ConductorEvent,
            ) -> ConductorResult<ConductorReceipt> {
                self.inner.submit_event(event).await
            }
            async fn submit_events_batch(
                &self,
                events: Vec<ConductorEvent>,
            ) -> ConductorResult<Vec<ConductorReceipt>> {
                self.inner.submit_events_batch(events).await
            }
            async fn health_check(&self) -> bool {
                true
            }
            async fn aclose(&self) {}
        }

        let backend = Arc::new(CountingClient {
            inner: InMemoryConductorClient::new(),
            calls: Mutex::new(0),
        });
        let cached = CachedConductorClient::new(
            backend.clone(),
            ConductorCache::new(Duration::from_secs(60), 10),
        );

        assert!(cached.get_day_proof(7).await.unwrap().is_some());
        assert!(cached.get_day_proof(7).await.unwrap().is_some());
        assert_eq!(*backend.calls.lock(), 1);
    }
}
