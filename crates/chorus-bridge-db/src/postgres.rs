//! PostgreSQL store
//!
//! All queries are runtime-bound (`query_as` + `bind`). The replay caches
//! rely on `INSERT … ON CONFLICT DO NOTHING` for atomic insert-if-absent;
//! the ledgers check rows out with `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never hold the same row.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::info;
use uuid::Uuid;

use chorus_bridge_proto::{
    CommunityCreation, CommunityMembershipUpdate, CommunityUpdate, PostAnnouncement,
    UserRegistration, UserUpdate,
};
use chorus_bridge_types::DayProofResponse;

use crate::error::{StoreError, StoreResult};
use crate::models::*;
use crate::store::BridgeStore;
use crate::unix_now;

/// PostgreSQL-backed [`BridgeStore`]
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct DayProofRow {
    day: i64,
    proof: String,
    proof_hash: String,
    canonical: bool,
    source: String,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to PostgreSQL and run pending migrations
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(format!("PostgreSQL: {e}")))?;
        info!("Connected to PostgreSQL");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        info!("Migrations complete");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BridgeStore for PgStore {
    async fn upsert_day_proof(&self, proof: &DayProofResponse) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO day_proofs (day, proof, proof_hash, canonical, source, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (day) DO UPDATE SET
                proof = EXCLUDED.proof,
                proof_hash = EXCLUDED.proof_hash,
                canonical = EXCLUDED.canonical,
                source = EXCLUDED.source,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(proof.day_number as i64)
        .bind(&proof.proof)
        .bind(&proof.proof_hash)
        .bind(proof.canonical)
        .bind(&proof.source)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_day_proof(&self, day_number: u64) -> StoreResult<Option<DayProofResponse>> {
        let row = sqlx::query_as::<_, DayProofRow>(
            "SELECT day, proof, proof_hash, canonical, source FROM day_proofs WHERE day = $1",
        )
        .bind(day_number as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| DayProofResponse {
            day_number: r.day as u64,
            proof: r.proof,
            proof_hash: r.proof_hash,
            canonical: r.canonical,
            source: r.source,
        }))
    }

    async fn remember_envelope(
        &self,
        fingerprint: &str,
        sender_instance: &str,
        message_type: &str,
        ttl_seconds: i64,
    ) -> StoreResult<bool> {
        let now = unix_now();
        sqlx::query("DELETE FROM envelope_cache WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query(
            r#"
            INSERT INTO envelope_cache (fingerprint, sender_instance, message_type, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
        )
        .bind(fingerprint)
        .bind(sender_instance)
        .bind(message_type)
        .bind(now + ttl_seconds)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remember_idempotency_key(
        &self,
        instance_id: &str,
        key: &str,
        ttl_seconds: i64,
    ) -> StoreResult<bool> {
        let now = unix_now();
        sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (instance_id, key, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (instance_id, key) DO NOTHING
            "#,
        )
        .bind(instance_id)
        .bind(key)
        .bind(now + ttl_seconds)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remember_jti(
        &self,
        jti: &str,
        instance_id: &str,
        expires_at: i64,
    ) -> StoreResult<bool> {
        sqlx::query("DELETE FROM jti_cache WHERE expires_at < $1")
            .bind(unix_now())
            .execute(&self.pool)
            .await?;
        let result = sqlx::query(
            r#"
            INSERT INTO jti_cache (jti, instance_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(jti)
        .bind(instance_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn enqueue_export(&self, export: NewExport) -> StoreResult<String> {
        let job_id = Uuid::new_v4().to_string();
        let now = unix_now();
        sqlx::query(
            r#"
            INSERT INTO export_ledger
                (id, stage_instance, object_hash, ap_type, target_url, status,
                 attempts, published_ts, retry_at, created_at, raw_payload)
            VALUES ($1, $2, $3, $4, $5, 'queued', 0, $6, $7, $7, $8)
            "#,
        )
        .bind(&job_id)
        .bind(&export.stage_instance)
        .bind(&export.object_hash)
        .bind(&export.ap_type)
        .bind(&export.target_url)
        .bind(export.published_ts)
        .bind(now)
        .bind(&export.raw_payload)
        .execute(&self.pool)
        .await?;
        Ok(job_id)
    }

    async fn claim_due_exports(&self, limit: i64) -> StoreResult<Vec<ExportLedgerRow>> {
        let rows = sqlx::query_as::<_, ExportLedgerRow>(
            r#"
            UPDATE export_ledger SET status = 'sending'
            WHERE id IN (
                SELECT id FROM export_ledger
                WHERE status IN ('queued', 'retrying') AND retry_at <= $1
                ORDER BY retry_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(unix_now())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_export_delivered(&self, job_id: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE export_ledger SET status = 'delivered', last_attempt_at = $2
            WHERE id = $1 AND status NOT IN ('delivered', 'failed')
            "#,
        )
        .bind(job_id)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_export_retry(
        &self,
        job_id: &str,
        attempts: i32,
        retry_at: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE export_ledger
            SET status = 'retrying', attempts = $2, retry_at = $3, last_attempt_at = $4
            WHERE id = $1 AND status NOT IN ('delivered', 'failed')
            "#,
        )
        .bind(job_id)
        .bind(attempts)
        .bind(retry_at)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_export_failed(&self, job_id: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE export_ledger SET status = 'failed', last_attempt_at = $2
            WHERE id = $1 AND status NOT IN ('delivered', 'failed')
            "#,
        )
        .bind(job_id)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_export(&self, job_id: &str) -> StoreResult<Option<ExportLedgerRow>> {
        let row = sqlx::query_as::<_, ExportLedgerRow>("SELECT * FROM export_ledger WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn enqueue_outbound(
        &self,
        target_instance_url: &str,
        message_type: &str,
        raw_envelope: &[u8],
    ) -> StoreResult<String> {
        let job_id = Uuid::new_v4().to_string();
        let now = unix_now();
        sqlx::query(
            r#"
            INSERT INTO outbound_federation_ledger
                (id, target_instance_url, message_type, raw_envelope, status,
                 attempts, retry_at, created_at)
            VALUES ($1, $2, $3, $4, 'queued', 0, $5, $5)
            "#,
        )
        .bind(&job_id)
        .bind(target_instance_url)
        .bind(message_type)
        .bind(raw_envelope)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(job_id)
    }

    async fn claim_due_outbound(&self, limit: i64) -> StoreResult<Vec<OutboundLedgerRow>> {
        let rows = sqlx::query_as::<_, OutboundLedgerRow>(
            r#"
            UPDATE outbound_federation_ledger SET status = 'sending'
            WHERE id IN (
                SELECT id FROM outbound_federation_ledger
                WHERE status IN ('queued', 'retrying') AND retry_at <= $1
                ORDER BY retry_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(unix_now())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_outbound_delivered(&self, job_id: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE outbound_federation_ledger SET status = 'delivered', last_attempt_at = $2
            WHERE id = $1 AND status NOT IN ('delivered', 'failed')
            "#,
        )
        .bind(job_id)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_outbound_retry(
        &self,
        job_id: &str,
        attempts: i32,
        retry_at: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE outbound_federation_ledger
            SET status = 'retrying', attempts = $2, retry_at = $3, last_attempt_at = $4
            WHERE id = $1 AND status NOT IN ('delivered', 'failed')
            "#,
        )
        .bind(job_id)
        .bind(attempts)
        .bind(retry_at)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_outbound_failed(&self, job_id: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE outbound_federation_ledger SET status = 'failed', last_attempt_at = $2
            WHERE id = $1 AND status NOT IN ('delivered', 'failed')
            "#,
        )
        .bind(job_id)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_outbound(&self, job_id: &str) -> StoreResult<Option<OutboundLedgerRow>> {
        let row = sqlx::query_as::<_, OutboundLedgerRow>(
            "SELECT * FROM outbound_federation_ledger WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn save_federated_post(
        &self,
        sender_instance: &str,
        post: &PostAnnouncement,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO federated_posts
                (post_id, author_pubkey, content_hash, order_index, creation_day,
                 sender_instance, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (post_id) DO NOTHING
            "#,
        )
        .bind(hex::encode(&post.post_id))
        .bind(hex::encode(&post.author_pubkey))
        .bind(hex::encode(&post.content_hash))
        .bind(post.order_index as i64)
        .bind(post.creation_day as i64)
        .bind(sender_instance)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_registered_user(
        &self,
        sender_instance: &str,
        registration: &UserRegistration,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO registered_users
                (user_pubkey, registration_day, day_proof_hash, sender_instance, received_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_pubkey) DO NOTHING
            "#,
        )
        .bind(hex::encode(&registration.user_pubkey))
        .bind(registration.registration_day as i64)
        .bind(hex::encode(&registration.day_proof_hash))
        .bind(sender_instance)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_federated_community(
        &self,
        sender_instance: &str,
        community: &CommunityCreation,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO federated_communities
                (community_id, creator_pubkey, name, description, creation_day,
                 sender_instance, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (community_id) DO NOTHING
            "#,
        )
        .bind(hex::encode(&community.community_id))
        .bind(hex::encode(&community.creator_pubkey))
        .bind(&community.name)
        .bind(&community.description)
        .bind(community.creation_day as i64)
        .bind(sender_instance)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_federated_user_update(
        &self,
        sender_instance: &str,
        update: &UserUpdate,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO federated_user_updates
                (id, user_pubkey, updated_fields_payload, update_day, sender_instance, received_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(hex::encode(&update.user_pubkey))
        .bind(&update.updated_fields_payload)
        .bind(update.update_day as i64)
        .bind(sender_instance)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_federated_community_update(
        &self,
        sender_instance: &str,
        update: &CommunityUpdate,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO federated_community_updates
                (id, community_id, updated_fields_payload, update_day, sender_instance, received_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(hex::encode(&update.community_id))
        .bind(&update.updated_fields_payload)
        .bind(update.update_day as i64)
        .bind(sender_instance)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_federated_community_membership(
        &self,
        sender_instance: &str,
        membership: &CommunityMembershipUpdate,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO federated_community_memberships
                (id, community_id, user_pubkey, action, update_day, sender_instance, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(hex::encode(&membership.community_id))
        .bind(hex::encode(&membership.user_pubkey))
        .bind(&membership.action)
        .bind(membership.update_day as i64)
        .bind(sender_instance)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_federated_post(&self, post_id: &str) -> StoreResult<Option<FederatedPostRow>> {
        let row =
            sqlx::query_as::<_, FederatedPostRow>("SELECT * FROM federated_posts WHERE post_id = $1")
                .bind(post_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn get_registered_user(
        &self,
        user_pubkey: &str,
    ) -> StoreResult<Option<RegisteredUserRow>> {
        let row = sqlx::query_as::<_, RegisteredUserRow>(
            "SELECT * FROM registered_users WHERE user_pubkey = $1",
        )
        .bind(user_pubkey)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_federated_community(
        &self,
        community_id: &str,
    ) -> StoreResult<Option<FederatedCommunityRow>> {
        let row = sqlx::query_as::<_, FederatedCommunityRow>(
            "SELECT * FROM federated_communities WHERE community_id = $1",
        )
        .bind(community_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_moderation_event(&self, event: NewModerationEvent) -> StoreResult<String> {
        let event_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO moderation_events
                (id, target_ref, action, reason_hash, creation_day, raw_payload,
                 stage_instance, signature, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&event_id)
        .bind(&event.target_ref)
        .bind(&event.action)
        .bind(&event.reason_hash)
        .bind(event.creation_day)
        .bind(&event.raw_payload)
        .bind(&event.stage_instance)
        .bind(&event.signature)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(event_id)
    }

    async fn get_moderation_event(
        &self,
        event_id: &str,
    ) -> StoreResult<Option<ModerationEventRow>> {
        let row = sqlx::query_as::<_, ModerationEventRow>(
            "SELECT * FROM moderation_events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn quarantine_envelope(&self, raw_envelope: &[u8], reason: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO quarantined_envelopes (id, raw_envelope, reason, quarantined_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(raw_envelope)
        .bind(reason)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
