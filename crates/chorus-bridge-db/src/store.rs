//! The bridge persistence interface

use async_trait::async_trait;

use chorus_bridge_proto::{
    CommunityCreation, CommunityMembershipUpdate, CommunityUpdate, PostAnnouncement,
    UserRegistration, UserUpdate,
};
use chorus_bridge_types::DayProofResponse;

use crate::error::StoreResult;
use crate::models::{
    ExportLedgerRow, FederatedCommunityRow, FederatedPostRow, ModerationEventRow, NewExport,
    NewModerationEvent, OutboundLedgerRow, RegisteredUserRow,
};

/// Durable storage operations owned by the bridge pipeline and its workers
///
/// The `remember_*` operations are atomic insert-if-absent primitives: they
/// return `false` when the key already exists, and purge expired entries as
/// they go. The `claim_due_*` operations perform an exclusive row checkout
/// (at most one worker attempt in flight per row); `mark_*` transitions
/// never overwrite a terminal `delivered`/`failed` state.
#[async_trait]
pub trait BridgeStore: Send + Sync {
    // Day proofs ----------------------------------------------------------

    /// Insert or replace the proof for a day (last writer wins)
    async fn upsert_day_proof(&self, proof: &DayProofResponse) -> StoreResult<()>;

    async fn get_day_proof(&self, day_number: u64) -> StoreResult<Option<DayProofResponse>>;

    // Replay / idempotency / JTI caches -----------------------------------

    /// Remember an envelope fingerprint; `false` means replay
    async fn remember_envelope(
        &self,
        fingerprint: &str,
        sender_instance: &str,
        message_type: &str,
        ttl_seconds: i64,
    ) -> StoreResult<bool>;

    /// Remember an idempotency key for an instance; `false` means replay
    async fn remember_idempotency_key(
        &self,
        instance_id: &str,
        key: &str,
        ttl_seconds: i64,
    ) -> StoreResult<bool>;

    /// Remember a JWT id until `expires_at`; `false` means replay
    async fn remember_jti(&self, jti: &str, instance_id: &str, expires_at: i64)
        -> StoreResult<bool>;

    // ActivityPub export ledger -------------------------------------------

    async fn enqueue_export(&self, export: NewExport) -> StoreResult<String>;

    /// Check out due export rows, flipping them to the in-flight marker
    async fn claim_due_exports(&self, limit: i64) -> StoreResult<Vec<ExportLedgerRow>>;

    async fn mark_export_delivered(&self, job_id: &str) -> StoreResult<()>;

    async fn mark_export_retry(&self, job_id: &str, attempts: i32, retry_at: i64)
        -> StoreResult<()>;

    async fn mark_export_failed(&self, job_id: &str) -> StoreResult<()>;

    async fn get_export(&self, job_id: &str) -> StoreResult<Option<ExportLedgerRow>>;

    // Outbound federation ledger ------------------------------------------

    async fn enqueue_outbound(
        &self,
        target_instance_url: &str,
        message_type: &str,
        raw_envelope: &[u8],
    ) -> StoreResult<String>;

    /// Check out due outbound rows, flipping them to the in-flight marker
    async fn claim_due_outbound(&self, limit: i64) -> StoreResult<Vec<OutboundLedgerRow>>;

    async fn mark_outbound_delivered(&self, job_id: &str) -> StoreResult<()>;

    async fn mark_outbound_retry(
        &self,
        job_id: &str,
        attempts: i32,
        retry_at: i64,
    ) -> StoreResult<()>;

    async fn mark_outbound_failed(&self, job_id: &str) -> StoreResult<()>;

    async fn get_outbound(&self, job_id: &str) -> StoreResult<Option<OutboundLedgerRow>>;

    // Federated entity records --------------------------------------------

    async fn save_federated_post(
        &self,
        sender_instance: &str,
        post: &PostAnnouncement,
    ) -> StoreResult<()>;

    async fn save_registered_user(
        &self,
        sender_instance: &str,
        registration: &UserRegistration,
    ) -> StoreResult<()>;

    async fn save_federated_community(
        &self,
        sender_instance: &str,
        community: &CommunityCreation,
    ) -> StoreResult<()>;

    async fn save_federated_user_update(
        &self,
        sender_instance: &str,
        update: &UserUpdate,
    ) -> StoreResult<()>;

    async fn save_federated_community_update(
        &self,
        sender_instance: &str,
        update: &CommunityUpdate,
    ) -> StoreResult<()>;

    async fn save_federated_community_membership(
        &self,
        sender_instance: &str,
        membership: &CommunityMembershipUpdate,
    ) -> StoreResult<()>;

    async fn get_federated_post(&self, post_id: &str) -> StoreResult<Option<FederatedPostRow>>;

    async fn get_registered_user(&self, user_pubkey: &str)
        -> StoreResult<Option<RegisteredUserRow>>;

    async fn get_federated_community(
        &self,
        community_id: &str,
    ) -> StoreResult<Option<FederatedCommunityRow>>;

    // Moderation -----------------------------------------------------------

    async fn record_moderation_event(&self, event: NewModerationEvent) -> StoreResult<String>;

    async fn get_moderation_event(&self, event_id: &str)
        -> StoreResult<Option<ModerationEventRow>>;

    // Quarantine -----------------------------------------------------------

    /// Park unparseable envelope bytes for operator review
    async fn quarantine_envelope(&self, raw_envelope: &[u8], reason: &str) -> StoreResult<()>;

    // Liveness -------------------------------------------------------------

    /// Readiness probe against the backing database
    async fn ping(&self) -> StoreResult<()>;
}
