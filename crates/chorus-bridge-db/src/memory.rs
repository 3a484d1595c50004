//! In-memory store for tests and local development
//!
//! Mirrors the PostgreSQL semantics exactly: atomic insert-if-absent for the
//! replay caches, exclusive checkout for ledger rows, and terminal-state
//! guards on every status transition.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use chorus_bridge_proto::{
    CommunityCreation, CommunityMembershipUpdate, CommunityUpdate, PostAnnouncement,
    UserRegistration, UserUpdate,
};
use chorus_bridge_types::DayProofResponse;

use crate::error::StoreResult;
use crate::models::*;
use crate::store::BridgeStore;
use crate::unix_now;

#[derive(Default)]
struct Inner {
    day_proofs: HashMap<u64, DayProofResponse>,
    envelopes: HashMap<String, i64>,
    idempotency: HashMap<(String, String), i64>,
    jti: HashMap<String, i64>,
    exports: HashMap<String, ExportLedgerRow>,
    export_order: Vec<String>,
    outbound: HashMap<String, OutboundLedgerRow>,
    outbound_order: Vec<String>,
    posts: HashMap<String, FederatedPostRow>,
    users: HashMap<String, RegisteredUserRow>,
    communities: HashMap<String, FederatedCommunityRow>,
    user_updates: Vec<(String, String, i64)>,
    community_updates: Vec<(String, String, i64)>,
    memberships: Vec<(String, String, String, i64)>,
    moderation: HashMap<String, ModerationEventRow>,
    quarantined: Vec<(Vec<u8>, String, i64)>,
}

/// In-memory [`BridgeStore`]
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quarantined_count(&self) -> usize {
        self.inner.lock().quarantined.len()
    }

    pub fn outbound_count(&self) -> usize {
        self.inner.lock().outbound.len()
    }

    pub fn federated_user_update_count(&self) -> usize {
        self.inner.lock().user_updates.len()
    }

    pub fn federated_community_update_count(&self) -> usize {
        self.inner.lock().community_updates.len()
    }

    pub fn federated_community_membership_count(&self) -> usize {
        self.inner.lock().memberships.len()
    }
}

#[async_trait]
impl BridgeStore for MemoryStore {
    async fn upsert_day_proof(&self, proof: &DayProofResponse) -> StoreResult<()> {
        self.inner
            .lock()
            .day_proofs
            .insert(proof.day_number, proof.clone());
        Ok(())
    }

    async fn get_day_proof(&self, day_number: u64) -> StoreResult<Option<DayProofResponse>> {
        Ok(self.inner.lock().day_proofs.get(&day_number).cloned())
    }

    async fn remember_envelope(
        &self,
        fingerprint: &str,
        _sender_instance: &str,
        _message_type: &str,
        ttl_seconds: i64,
    ) -> StoreResult<bool> {
        let now = unix_now();
        let mut inner = self.inner.lock();
        inner.envelopes.retain(|_, expires| *expires >= now);
        if inner.envelopes.contains_key(fingerprint) {
            return Ok(false);
        }
        inner
            .envelopes
            .insert(fingerprint.to_string(), now + ttl_seconds);
        Ok(true)
    }

    async fn remember_idempotency_key(
        &self,
        instance_id: &str,
        key: &str,
        ttl_seconds: i64,
    ) -> StoreResult<bool> {
        let now = unix_now();
        let mut inner = self.inner.lock();
        inner.idempotency.retain(|_, expires| *expires >= now);
        let composite = (instance_id.to_string(), key.to_string());
        if inner.idempotency.contains_key(&composite) {
            return Ok(false);
        }
        inner.idempotency.insert(composite, now + ttl_seconds);
        Ok(true)
    }

    async fn remember_jti(
        &self,
        jti: &str,
        _instance_id: &str,
        expires_at: i64,
    ) -> StoreResult<bool> {
        let now = unix_now();
        let mut inner = self.inner.lock();
        inner.jti.retain(|_, expires| *expires >= now);
        if inner.jti.contains_key(jti) {
            return Ok(false);
        }
        inner.jti.insert(jti.to_string(), expires_at);
        Ok(true)
    }

    async fn enqueue_export(&self, export: NewExport) -> StoreResult<String> {
        let job_id = Uuid::new_v4().to_string();
        let now = unix_now();
        let row = ExportLedgerRow {
            id: job_id.clone(),
            stage_instance: export.stage_instance,
            object_hash: export.object_hash,
            ap_type: export.ap_type,
            target_url: export.target_url,
            status: LedgerStatus::Queued.as_str().to_string(),
            attempts: 0,
            published_ts: export.published_ts,
            retry_at: now,
            last_attempt_at: None,
            created_at: now,
            raw_payload: export.raw_payload,
        };
        let mut inner = self.inner.lock();
        inner.exports.insert(job_id.clone(), row);
        inner.export_order.push(job_id.clone());
        Ok(job_id)
    }

    async fn claim_due_exports(&self, limit: i64) -> StoreResult<Vec<ExportLedgerRow>> {
        let now = unix_now();
        let mut inner = self.inner.lock();
        let order = inner.export_order.clone();
        let mut claimed = Vec::new();
        for id in order {
            if claimed.len() as i64 >= limit {
                break;
            }
            if let Some(row) = inner.exports.get_mut(&id) {
                let due = matches!(
                    LedgerStatus::parse(&row.status),
                    Some(LedgerStatus::Queued | LedgerStatus::Retrying)
                ) && row.retry_at <= now;
                if due {
                    row.status = LedgerStatus::Sending.as_str().to_string();
                    claimed.push(row.clone());
                }
            }
        }
        Ok(claimed)
    }

    async fn mark_export_delivered(&self, job_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(row) = inner.exports.get_mut(job_id) {
            if !LedgerStatus::parse(&row.status).is_some_and(|s| s.is_terminal()) {
                row.status = LedgerStatus::Delivered.as_str().to_string();
                row.last_attempt_at = Some(unix_now());
            }
        }
        Ok(())
    }

    async fn mark_export_retry(
        &self,
        job_id: &str,
        attempts: i32,
        retry_at: i64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(row) = inner.exports.get_mut(job_id) {
            if !LedgerStatus::parse(&row.status).is_some_and(|s| s.is_terminal()) {
                row.status = LedgerStatus::Retrying.as_str().to_string();
                row.attempts = attempts;
                row.retry_at = retry_at;
                row.last_attempt_at = Some(unix_now());
            }
        }
        Ok(())
    }

    async fn mark_export_failed(&self, job_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(row) = inner.exports.get_mut(job_id) {
            if !LedgerStatus::parse(&row.status).is_some_and(|s| s.is_terminal()) {
                row.status = LedgerStatus::Failed.as_str().to_string();
                row.last_attempt_at = Some(unix_now());
            }
        }
        Ok(())
    }

    async fn get_export(&self, job_id: &str) -> StoreResult<Option<ExportLedgerRow>> {
        Ok(self.inner.lock().exports.get(job_id).cloned())
    }

    async fn enqueue_outbound(
        &self,
        target_instance_url: &str,
        message_type: &str,
        raw_envelope: &[u8],
    ) -> StoreResult<String> {
        let job_id = Uuid::new_v4().to_string();
        let now = unix_now();
        let row = OutboundLedgerRow {
            id: job_id.clone(),
            target_instance_url: target_instance_url.to_string(),
            message_type: message_type.to_string(),
            raw_envelope: raw_envelope.to_vec(),
            status: LedgerStatus::Queued.as_str().to_string(),
            attempts: 0,
            retry_at: now,
            last_attempt_at: None,
            created_at: now,
        };
        let mut inner = self.inner.lock();
        inner.outbound.insert(job_id.clone(), row);
        inner.outbound_order.push(job_id.clone());
        Ok(job_id)
    }

    async fn claim_due_outbound(&self, limit: i64) -> StoreResult<Vec<OutboundLedgerRow>> {
        let now = unix_now();
        let mut inner = self.inner.lock();
        let order = inner.outbound_order.clone();
        let mut claimed = Vec::new();
        for id in order {
            if claimed.len() as i64 >= limit {
                break;
            }
            if let Some(row) = inner.outbound.get_mut(&id) {
                let due = matches!(
                    LedgerStatus::parse(&row.status),
                    Some(LedgerStatus::Queued | LedgerStatus::Retrying)
                ) && row.retry_at <= now;
                if due {
                    row.status = LedgerStatus::Sending.as_str().to_string();
                    claimed.push(row.clone());
                }
            }
        }
        Ok(claimed)
    }

    async fn mark_outbound_delivered(&self, job_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(row) = inner.outbound.get_mut(job_id) {
            if !LedgerStatus::parse(&row.status).is_some_and(|s| s.is_terminal()) {
                row.status = LedgerStatus::Delivered.as_str().to_string();
                row.last_attempt_at = Some(unix_now());
            }
        }
        Ok(())
    }

    async fn mark_outbound_retry(
        &self,
        job_id: &str,
        attempts: i32,
        retry_at: i64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(row) = inner.outbound.get_mut(job_id) {
            if !LedgerStatus::parse(&row.status).is_some_and(|s| s.is_terminal()) {
                row.status = LedgerStatus::Retrying.as_str().to_string();
                row.attempts = attempts;
                row.retry_at = retry_at;
                row.last_attempt_at = Some(unix_now());
            }
        }
        Ok(())
    }

    async fn mark_outbound_failed(&self, job_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(row) = inner.outbound.get_mut(job_id) {
            if !LedgerStatus::parse(&row.status).is_some_and(|s| s.is_terminal()) {
                row.status = LedgerStatus::Failed.as_str().to_string();
                row.last_attempt_at = Some(unix_now());
            }
        }
        Ok(())
    }

    async fn get_outbound(&self, job_id: &str) -> StoreResult<Option<OutboundLedgerRow>> {
        Ok(self.inner.lock().outbound.get(job_id).cloned())
    }

    async fn save_federated_post(
        &self,
        sender_instance: &str,
        post: &PostAnnouncement,
    ) -> StoreResult<()> {
        let post_id = hex::encode(&post.post_id);
        let row = FederatedPostRow {
            post_id: post_id.clone(),
            author_pubkey: hex::encode(&post.author_pubkey),
            content_hash: hex::encode(&post.content_hash),
            order_index: post.order_index as i64,
            creation_day: post.creation_day as i64,
            sender_instance: sender_instance.to_string(),
            received_at: unix_now(),
        };
        self.inner.lock().posts.entry(post_id).or_insert(row);
        Ok(())
    }

    async fn save_registered_user(
        &self,
        sender_instance: &str,
        registration: &UserRegistration,
    ) -> StoreResult<()> {
        let user_pubkey = hex::encode(&registration.user_pubkey);
        let row = RegisteredUserRow {
            user_pubkey: user_pubkey.clone(),
            registration_day: registration.registration_day as i64,
            day_proof_hash: hex::encode(&registration.day_proof_hash),
            sender_instance: sender_instance.to_string(),
            received_at: unix_now(),
        };
        self.inner.lock().users.entry(user_pubkey).or_insert(row);
        Ok(())
    }

    async fn save_federated_community(
        &self,
        sender_instance: &str,
        community: &CommunityCreation,
    ) -> StoreResult<()> {
        let community_id = hex::encode(&community.community_id);
        let row = FederatedCommunityRow {
            community_id: community_id.clone(),
            creator_pubkey: hex::encode(&community.creator_pubkey),
            name: community.name.clone(),
            description: community.description.clone(),
            creation_day: community.creation_day as i64,
            sender_instance: sender_instance.to_string(),
            received_at: unix_now(),
        };
        self.inner
            .lock()
            .communities
            .entry(community_id)
            .or_insert(row);
        Ok(())
    }

    async fn save_federated_user_update(
        &self,
        sender_instance: &str,
        update: &UserUpdate,
    ) -> StoreResult<()> {
        self.inner.lock().user_updates.push((
            sender_instance.to_string(),
            hex::encode(&update.user_pubkey),
            update.update_day as i64,
        ));
        Ok(())
    }

    async fn save_federated_community_update(
        &self,
        sender_instance: &str,
        update: &CommunityUpdate,
    ) -> StoreResult<()> {
        self.inner.lock().community_updates.push((
            sender_instance.to_string(),
            hex::encode(&update.community_id),
            update.update_day as i64,
        ));
        Ok(())
    }

    async fn save_federated_community_membership(
        &self,
        sender_instance: &str,
        membership: &CommunityMembershipUpdate,
    ) -> StoreResult<()> {
        self.inner.lock().memberships.push((
            hex::encode(&membership.community_id),
            hex::encode(&membership.user_pubkey),
            membership.action.clone(),
            membership.update_day as i64,
        ));
        Ok(())
    }

    async fn get_federated_post(&self, post_id: &str) -> StoreResult<Option<FederatedPostRow>> {
        Ok(self.inner.lock().posts.get(post_id).cloned())
    }

    async fn get_registered_user(
        &self,
        user_pubkey: &str,
    ) -> StoreResult<Option<RegisteredUserRow>> {
        Ok(self.inner.lock().users.get(user_pubkey).cloned())
    }

    async fn get_federated_community(
        &self,
        community_id: &str,
    ) -> StoreResult<Option<FederatedCommunityRow>> {
        Ok(self.inner.lock().communities.get(community_id).cloned())
    }

    async fn record_moderation_event(&self, event: NewModerationEvent) -> StoreResult<String> {
        let event_id = Uuid::new_v4().to_string();
        let row = ModerationEventRow {
            id: event_id.clone(),
            target_ref: event.target_ref,
            action: event.action,
            reason_hash: event.reason_hash,
            creation_day: event.creation_day,
            raw_payload: event.raw_payload,
            stage_instance: event.stage_instance,
            signature: event.signature,
            received_at: unix_now(),
        };
        self.inner.lock().moderation.insert(event_id.clone(), row);
        Ok(event_id)
    }

    async fn get_moderation_event(
        &self,
        event_id: &str,
    ) -> StoreResult<Option<ModerationEventRow>> {
        Ok(self.inner.lock().moderation.get(event_id).cloned())
    }

    async fn quarantine_envelope(&self, raw_envelope: &[u8], reason: &str) -> StoreResult<()> {
        self.inner
            .lock()
            .quarantined
            .push((raw_envelope.to_vec(), reason.to_string(), unix_now()));
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remember_envelope_rejects_replay() {
        let store = MemoryStore::new();
        assert!(store
            .remember_envelope("fp1", "stage-a", "PostAnnouncement", 3600)
            .await
            .unwrap());
        assert!(!store
            .remember_envelope("fp1", "stage-a", "PostAnnouncement", 3600)
            .await
            .unwrap());
        assert!(store
            .remember_envelope("fp2", "stage-a", "PostAnnouncement", 3600)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_expired_fingerprint_can_be_reused() {
        let store = MemoryStore::new();
        assert!(store
            .remember_envelope("fp1", "stage-a", "PostAnnouncement", -10)
            .await
            .unwrap());
        // The expired entry is purged on the next upsert
        assert!(store
            .remember_envelope("fp1", "stage-a", "PostAnnouncement", 3600)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_idempotency_keys_are_scoped_per_instance() {
        let store = MemoryStore::new();
        assert!(store
            .remember_idempotency_key("stage-a", "abc-123", 600)
            .await
            .unwrap());
        assert!(!store
            .remember_idempotency_key("stage-a", "abc-123", 600)
            .await
            .unwrap());
        assert!(store
            .remember_idempotency_key("stage-b", "abc-123", 600)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_jti_replay_rejected() {
        let store = MemoryStore::new();
        let expires = unix_now() + 300;
        assert!(store.remember_jti("jti-1", "stage-a", expires).await.unwrap());
        assert!(!store.remember_jti("jti-1", "stage-a", expires).await.unwrap());
    }

    #[tokio::test]
    async fn test_outbound_claim_is_exclusive() {
        let store = MemoryStore::new();
        let id = store
            .enqueue_outbound("https://stage-b.example", "PostAnnouncement", b"env")
            .await
            .unwrap();
        let first = store.claim_due_outbound(10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, id);
        // A second claim finds nothing: the row is in flight
        assert!(store.claim_due_outbound(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_future_retry_is_not_due() {
        let store = MemoryStore::new();
        let id = store
            .enqueue_outbound("https://stage-b.example", "PostAnnouncement", b"env")
            .await
            .unwrap();
        store.claim_due_outbound(10).await.unwrap();
        store
            .mark_outbound_retry(&id, 1, unix_now() + 120)
            .await
            .unwrap();
        assert!(store.claim_due_outbound(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_status_is_monotonic() {
        let store = MemoryStore::new();
        let id = store
            .enqueue_outbound("https://stage-b.example", "PostAnnouncement", b"env")
            .await
            .unwrap();
        store.claim_due_outbound(10).await.unwrap();
        store.mark_outbound_delivered(&id).await.unwrap();
        // Late failure report must not reopen the row
        store.mark_outbound_retry(&id, 3, unix_now()).await.unwrap();
        store.mark_outbound_failed(&id).await.unwrap();
        let row = store.get_outbound(&id).await.unwrap().unwrap();
        assert_eq!(row.status, "delivered");
    }

    #[tokio::test]
    async fn test_day_proof_last_writer_wins() {
        let store = MemoryStore::new();
        let first = DayProofResponse {
            day_number: 7,
            proof: "aa".into(),
            proof_hash: "h1".into(),
            canonical: true,
            source: "conductor".into(),
        };
        let second = DayProofResponse {
            proof_hash: "h2".into(),
            source: "stage-a".into(),
            ..first.clone()
        };
        store.upsert_day_proof(&first).await.unwrap();
        store.upsert_day_proof(&second).await.unwrap();
        let stored = store.get_day_proof(7).await.unwrap().unwrap();
        assert_eq!(stored.proof_hash, "h2");
        assert_eq!(stored.source, "stage-a");
    }

    #[tokio::test]
    async fn test_federated_post_dedups_on_natural_key() {
        let store = MemoryStore::new();
        let post = PostAnnouncement {
            post_id: b"p1".to_vec(),
            author_pubkey: vec![1; 32],
            content_hash: b"c1".to_vec(),
            order_index: 1,
            creation_day: 5,
        };
        store.save_federated_post("stage-a", &post).await.unwrap();
        store.save_federated_post("stage-b", &post).await.unwrap();
        let row = store
            .get_federated_post(&hex::encode(b"p1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.sender_instance, "stage-a");
    }
}
