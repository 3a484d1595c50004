//! In-memory Conductor client for tests and development

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use chorus_bridge_types::DayProofResponse;

use crate::{ConductorClient, ConductorEvent, ConductorReceipt, ConductorResult};

/// Conductor double with deterministic receipts
///
/// `event_hash` is the SHA-256 of the payload, so identical submissions
/// produce identical receipts. Submitted events are recorded for
/// inspection in tests.
#[derive(Default)]
pub struct InMemoryConductorClient {
    submitted: Mutex<Vec<ConductorEvent>>,
}

impl InMemoryConductorClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events submitted so far, in order
    pub fn submitted(&self) -> Vec<ConductorEvent> {
        self.submitted.lock().clone()
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.lock().len()
    }
}

#[async_trait]
impl ConductorClient for InMemoryConductorClient {
    async fn get_day_proof(&self, day_number: u64) -> ConductorResult<Option<DayProofResponse>> {
        Ok(Some(DayProofResponse {
            day_number,
            proof: format!("memory_proof_{day_number}"),
            proof_hash: hex::encode(Sha256::digest(day_number.to_be_bytes())),
            canonical: true,
            source: "in_memory".to_string(),
        }))
    }

    async fn submit_event(&self, event: ConductorEvent) -> ConductorResult<ConductorReceipt> {
        let receipt = ConductorReceipt {
            event_hash: hex::encode(Sha256::digest(&event.payload)),
            epoch: event.epoch,
        };
        self.submitted.lock().push(event);
        Ok(receipt)
    }

    async fn submit_events_batch(
        &self,
        events: Vec<ConductorEvent>,
    ) -> ConductorResult<Vec<ConductorReceipt>> {
        let mut receipts = Vec::with_capacity(events.len());
        for event in events {
            receipts.push(self.submit_event(event).await?);
        }
        Ok(receipts)
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn aclose(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receipts_are_deterministic() {
        let client = InMemoryConductorClient::new();
        let first = client
            .submit_event(ConductorEvent::new("federation_envelope", 5, vec![1, 2, 3]))
            .await
            .unwrap();
        let second = client
            .submit_event(ConductorEvent::new("federation_envelope", 5, vec![1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(client.submitted_count(), 2);
    }

    #[tokio::test]
    async fn test_day_proof_is_always_available() {
        let client = InMemoryConductorClient::new();
        let proof = client.get_day_proof(7).await.unwrap().unwrap();
        assert_eq!(proof.day_number, 7);
        assert_eq!(proof.source, "in_memory");
    }
}
