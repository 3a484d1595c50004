//! The bridge pipeline
//!
//! `BridgeService` orchestrates envelope intake: signature gate, replay and
//! idempotency dedup, epoch derivation, Conductor submission, per-type
//! dispatch, and outbound fan-out. Steps are strictly sequential within one
//! envelope; the replay fingerprint commits before the Conductor submission
//! so a partial failure can never re-admit the same bytes.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use prost::Message as _;
use tracing::{debug, info, warn};

use chorus_bridge_conductor::{ConductorClient, ConductorError, ConductorEvent, ConductorReceipt};
use chorus_bridge_crypto::{envelope_fingerprint, verify_signature, TrustStore};
use chorus_bridge_db::{BridgeStore, NewExport, NewModerationEvent, StoreError};
use chorus_bridge_proto::{
    BlacklistUpdate, DecodedMessage, FederationEnvelope, MessageKind, ModerationEvent,
    PostAnnouncement,
};
use chorus_bridge_types::{
    ActivityPubExportRequest, BridgeConfig, BridgeError, BridgeResult, DayProofResponse,
    ModerationEventRequest,
};

use crate::translator::ActivityPubTranslator;

fn store_error(error: StoreError) -> BridgeError {
    BridgeError::Store(error.to_string())
}

fn conductor_error(error: ConductorError) -> BridgeError {
    BridgeError::BackendUnavailable(error.to_string())
}

/// Coordinator for high-level bridge operations
pub struct BridgeService {
    config: BridgeConfig,
    store: Arc<dyn BridgeStore>,
    trust_store: Arc<TrustStore>,
    conductor: Arc<dyn ConductorClient>,
    translator: ActivityPubTranslator,
    /// Dispatch table: message kinds with side effects enabled
    enabled: HashSet<MessageKind>,
}

impl BridgeService {
    pub fn new(
        config: BridgeConfig,
        store: Arc<dyn BridgeStore>,
        trust_store: Arc<TrustStore>,
        conductor: Arc<dyn ConductorClient>,
    ) -> Self {
        let translator = ActivityPubTranslator::new(
            config.export_genesis_timestamp,
            config.activitypub_actor_domain.clone(),
        );
        let mut enabled = HashSet::new();
        let flags = &config.features;
        if flags.post_announce {
            enabled.insert(MessageKind::PostAnnouncement);
        }
        if flags.user_registration {
            enabled.insert(MessageKind::UserRegistration);
        }
        if flags.day_proof_consumption {
            enabled.insert(MessageKind::DayProof);
        }
        if flags.moderation_events {
            enabled.insert(MessageKind::ModerationEvent);
        }
        if flags.community_creation {
            enabled.insert(MessageKind::CommunityCreation);
        }
        if flags.user_update {
            enabled.insert(MessageKind::UserUpdate);
        }
        if flags.community_update {
            enabled.insert(MessageKind::CommunityUpdate);
        }
        if flags.community_membership_update {
            enabled.insert(MessageKind::CommunityMembershipUpdate);
        }
        // Join and blacklist handling keep the trust store current and are
        // not feature-flagged
        enabled.insert(MessageKind::InstanceJoinRequest);
        enabled.insert(MessageKind::BlacklistUpdate);

        Self {
            translator,
            enabled,
            config,
            store,
            trust_store,
            conductor,
        }
    }

    pub fn store(&self) -> Arc<dyn BridgeStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn translator(&self) -> &ActivityPubTranslator {
        &self.translator
    }

    // Day proofs ------------------------------------------------------------

    /// Serve a day proof from the local cache, falling back to Conductor
    pub async fn get_day_proof(&self, day_number: u64) -> BridgeResult<Option<DayProofResponse>> {
        if let Some(stored) = self
            .store
            .get_day_proof(day_number)
            .await
            .map_err(store_error)?
        {
            return Ok(Some(stored));
        }
        match self.conductor.get_day_proof(day_number).await {
            Ok(Some(proof)) => {
                let response = DayProofResponse {
                    source: "conductor".to_string(),
                    ..proof
                };
                self.store
                    .upsert_day_proof(&response)
                    .await
                    .map_err(store_error)?;
                self.store
                    .get_day_proof(day_number)
                    .await
                    .map_err(store_error)
            }
            Ok(None) => Ok(None),
            Err(error) => {
                warn!(day_number, %error, "conductor day proof fetch failed");
                Ok(None)
            }
        }
    }

    // Federation envelopes --------------------------------------------------

    /// Process an incoming federation envelope end to end
    ///
    /// Returns the Conductor receipt and the envelope fingerprint.
    pub async fn process_envelope(
        &self,
        envelope: &FederationEnvelope,
        idempotency_key: Option<&str>,
        stage_instance: &str,
    ) -> BridgeResult<(ConductorReceipt, String)> {
        info!(
            sender = %envelope.sender_instance,
            message_type = %envelope.message_type,
            "received federation envelope"
        );

        let verify_key = self
            .trust_store
            .get(&envelope.sender_instance)
            .map_err(|_| {
                warn!(sender = %envelope.sender_instance, "unknown instance attempting federation");
                BridgeError::UnknownInstance(envelope.sender_instance.clone())
            })?;
        verify_signature(&envelope.message_data, &envelope.signature, &verify_key).map_err(
            |error| {
                warn!(sender = %envelope.sender_instance, %error, "signature verification failed");
                BridgeError::SignatureInvalid
            },
        )?;
        debug!(sender = %envelope.sender_instance, "signature verified");

        let fingerprint = envelope_fingerprint([
            envelope.sender_instance.as_bytes(),
            envelope.message_type.as_bytes(),
            envelope.message_data.as_slice(),
        ]);

        let remembered = self
            .store
            .remember_envelope(
                &fingerprint,
                &envelope.sender_instance,
                &envelope.message_type,
                self.config.replay_cache_ttl_seconds,
            )
            .await
            .map_err(store_error)?;
        if !remembered {
            warn!(sender = %envelope.sender_instance, fingerprint, "replay cache hit");
            return Err(BridgeError::DuplicateEnvelope(fingerprint));
        }

        if let Some(key) = idempotency_key {
            let fresh = self
                .store
                .remember_idempotency_key(stage_instance, key, self.config.idempotency_ttl_seconds)
                .await
                .map_err(store_error)?;
            if !fresh {
                warn!(stage_instance, key, "idempotency key replay");
                return Err(BridgeError::DuplicateIdempotencyKey(key.to_string()));
            }
        }

        let kind: MessageKind = envelope.message_type.parse().map_err(|_| {
            BridgeError::InvalidEnvelope(format!(
                "cannot derive epoch for unknown message type '{}'",
                envelope.message_type
            ))
        })?;
        let decoded = DecodedMessage::decode(kind, &envelope.message_data).map_err(|error| {
            BridgeError::InvalidEnvelope(format!("undecodable {kind} payload: {error}"))
        })?;
        let epoch = decoded.epoch();

        let event = ConductorEvent::new(kind.as_str(), epoch, envelope.message_data.clone())
            .with_metadata("sender_instance", envelope.sender_instance.clone())
            .with_metadata("message_type", envelope.message_type.clone());
        let receipt = self
            .conductor
            .submit_event(event)
            .await
            .map_err(conductor_error)?;
        info!(
            sender = %envelope.sender_instance,
            event_hash = %receipt.event_hash,
            epoch,
            "envelope submitted to conductor"
        );

        self.dispatch(&envelope.sender_instance, &decoded).await?;

        Ok((receipt, fingerprint))
    }

    async fn dispatch(&self, sender: &str, decoded: &DecodedMessage) -> BridgeResult<()> {
        let kind = decoded.kind();
        if !self.enabled.contains(&kind) {
            warn!(%kind, "dispatch disabled, envelope relayed to conductor only");
            return Ok(());
        }
        match decoded {
            DecodedMessage::PostAnnouncement(post) => {
                self.store
                    .save_federated_post(sender, post)
                    .await
                    .map_err(store_error)?;
                info!(post_id = %hex::encode(&post.post_id), sender, "federated post saved");
                self.fan_out(sender, decoded).await
            }
            DecodedMessage::UserRegistration(registration) => {
                self.store
                    .save_registered_user(sender, registration)
                    .await
                    .map_err(store_error)?;
                info!(
                    user = %hex::encode(&registration.user_pubkey),
                    sender,
                    "registered user saved"
                );
                self.fan_out(sender, decoded).await
            }
            DecodedMessage::DayProof(proof) => {
                // Only the canonical hash travels in this message; the full
                // proof still comes from Conductor
                let response = DayProofResponse {
                    day_number: proof.day_number,
                    proof: String::new(),
                    proof_hash: hex::encode(&proof.canonical_proof_hash),
                    canonical: true,
                    source: sender.to_string(),
                };
                self.store
                    .upsert_day_proof(&response)
                    .await
                    .map_err(store_error)?;
                info!(day = proof.day_number, sender, "day proof cache updated");
                self.fan_out(sender, decoded).await
            }
            DecodedMessage::ModerationEvent(event) => {
                self.store
                    .record_moderation_event(NewModerationEvent {
                        stage_instance: sender.to_string(),
                        target_ref: hex::encode(&event.target_ref),
                        action: event.action.clone(),
                        reason_hash: hex::encode(&event.reason_hash),
                        creation_day: event.creation_day as i64,
                        raw_payload: decoded.to_bytes(),
                        signature: None,
                    })
                    .await
                    .map_err(store_error)?;
                info!(
                    target = %hex::encode(&event.target_ref),
                    action = %event.action,
                    sender,
                    "moderation event recorded"
                );
                self.fan_out(sender, decoded).await
            }
            DecodedMessage::InstanceJoinRequest(join) => {
                self.trust_store
                    .add_from_bytes(&join.instance_id, &join.instance_pubkey)
                    .map_err(|_| {
                        BridgeError::InvalidEnvelope(format!(
                            "join request carries an invalid key for '{}'",
                            join.instance_id
                        ))
                    })?;
                info!(instance = %join.instance_id, "instance added to trust store");
                self.fan_out(sender, decoded).await
            }
            DecodedMessage::CommunityCreation(community) => {
                self.store
                    .save_federated_community(sender, community)
                    .await
                    .map_err(store_error)?;
                info!(
                    community = %hex::encode(&community.community_id),
                    sender,
                    "federated community saved"
                );
                self.fan_out(sender, decoded).await
            }
            DecodedMessage::UserUpdate(update) => {
                self.store
                    .save_federated_user_update(sender, update)
                    .await
                    .map_err(store_error)?;
                self.fan_out(sender, decoded).await
            }
            DecodedMessage::CommunityUpdate(update) => {
                self.store
                    .save_federated_community_update(sender, update)
                    .await
                    .map_err(store_error)?;
                self.fan_out(sender, decoded).await
            }
            DecodedMessage::CommunityMembershipUpdate(membership) => {
                self.store
                    .save_federated_community_membership(sender, membership)
                    .await
                    .map_err(store_error)?;
                self.fan_out(sender, decoded).await
            }
            DecodedMessage::BlacklistUpdate(update) => self.handle_blacklist_update(update),
        }
    }

    fn handle_blacklist_update(&self, update: &BlacklistUpdate) -> BridgeResult<()> {
        match update.action.as_str() {
            "add" => {
                self.trust_store.remove(&update.instance_id);
                info!(instance = %update.instance_id, "instance removed from trust store");
            }
            "remove" => {
                // Re-trusting requires a fresh join request accepted by
                // consensus, not an un-blacklist message
                warn!(
                    instance = %update.instance_id,
                    "un-blacklist is not supported via BlacklistUpdate"
                );
            }
            other => {
                warn!(instance = %update.instance_id, action = other, "unknown blacklist action");
            }
        }
        Ok(())
    }

    /// Enqueue a re-signable copy of the message for every target Stage
    ///
    /// The stored envelope carries an empty signature; the outbound worker
    /// attests it with the bridge key at send time. The nonce is derived
    /// from the message's natural keys so two bridges observing the same
    /// event enqueue byte-identical envelopes.
    async fn fan_out(&self, sender: &str, decoded: &DecodedMessage) -> BridgeResult<()> {
        if self.config.federation_target_stages.is_empty() {
            return Ok(());
        }
        let kind = decoded.kind();
        let outbound = FederationEnvelope {
            sender_instance: sender.to_string(),
            nonce: decoded.outbound_nonce(),
            message_type: kind.as_str().to_string(),
            message_data: decoded.to_bytes(),
            signature: Vec::new(),
        };
        let raw = outbound.to_bytes();
        for target in &self.config.federation_target_stages {
            let job_id = self
                .store
                .enqueue_outbound(target, kind.as_str(), &raw)
                .await
                .map_err(store_error)?;
            info!(%kind, target, job_id, "enqueued for outbound federation");
        }
        Ok(())
    }

    // ActivityPub -----------------------------------------------------------

    /// Verify and enqueue an ActivityPub export job
    pub async fn queue_activitypub_export(
        &self,
        request: &ActivityPubExportRequest,
        stage_instance: &str,
    ) -> BridgeResult<String> {
        let post_bytes = hex::decode(&request.chorus_post)
            .map_err(|_| BridgeError::InvalidEnvelope("invalid hex value for chorus_post".into()))?;
        let post = PostAnnouncement::decode(post_bytes.as_slice()).map_err(|error| {
            BridgeError::InvalidEnvelope(format!("undecodable chorus_post: {error}"))
        })?;

        let verify_key = self
            .trust_store
            .get(stage_instance)
            .map_err(|_| BridgeError::UnknownInstance(stage_instance.to_string()))?;
        // Stages sign the canonical hex form of the serialized post
        let canonical = hex::encode(&post_bytes);
        verify_signature(canonical.as_bytes(), &request.signature, &verify_key)
            .map_err(|_| BridgeError::SignatureInvalid)?;

        let (note, published_ts) = self.translator.build_note(&post, &request.body_md);
        let raw_payload = serde_json::to_vec(request)
            .map_err(|error| BridgeError::Store(format!("serialize export payload: {error}")))?;

        let mut job_ids = Vec::new();
        if self.config.activitypub_targets.is_empty() {
            // No delivery targets configured: record the job anyway so the
            // operator can see it age out
            let job_id = self
                .store
                .enqueue_export(NewExport {
                    stage_instance: stage_instance.to_string(),
                    object_hash: hex::encode(&post.post_id),
                    ap_type: "Note".to_string(),
                    target_url: String::new(),
                    published_ts,
                    raw_payload: raw_payload.clone(),
                })
                .await
                .map_err(store_error)?;
            job_ids.push(job_id);
        } else {
            for target in &self.config.activitypub_targets {
                let job_id = self
                    .store
                    .enqueue_export(NewExport {
                        stage_instance: stage_instance.to_string(),
                        object_hash: hex::encode(&post.post_id),
                        ap_type: "Note".to_string(),
                        target_url: target.clone(),
                        published_ts,
                        raw_payload: raw_payload.clone(),
                    })
                    .await
                    .map_err(store_error)?;
                job_ids.push(job_id);
            }
        }

        let note_json = serde_json::to_vec(&note)
            .map_err(|error| BridgeError::Store(format!("serialize note: {error}")))?;
        let event = ConductorEvent::new("activitypub_export", post.creation_day, note_json)
            .with_metadata("stage_instance", stage_instance.to_string())
            .with_metadata("post_id", hex::encode(&post.post_id));
        self.conductor
            .submit_event(event)
            .await
            .map_err(conductor_error)?;

        info!(
            post_id = %hex::encode(&post.post_id),
            stage_instance,
            jobs = job_ids.len(),
            "activitypub export enqueued"
        );
        Ok(job_ids.remove(0))
    }

    // Moderation ------------------------------------------------------------

    /// Verify, persist, and submit a moderation event
    pub async fn record_moderation_event(
        &self,
        request: &ModerationEventRequest,
        stage_instance: &str,
    ) -> BridgeResult<(String, ConductorReceipt)> {
        let event_bytes = hex::decode(&request.moderation_event).map_err(|_| {
            BridgeError::InvalidEnvelope("invalid hex value for moderation_event".into())
        })?;
        let event = ModerationEvent::decode(event_bytes.as_slice()).map_err(|error| {
            BridgeError::InvalidEnvelope(format!("undecodable moderation_event: {error}"))
        })?;

        let verify_key = self
            .trust_store
            .get(stage_instance)
            .map_err(|_| BridgeError::UnknownInstance(stage_instance.to_string()))?;
        let canonical = hex::encode(&event_bytes);
        verify_signature(canonical.as_bytes(), &request.signature, &verify_key)
            .map_err(|_| BridgeError::SignatureInvalid)?;

        let event_id = self
            .store
            .record_moderation_event(NewModerationEvent {
                stage_instance: stage_instance.to_string(),
                target_ref: hex::encode(&event.target_ref),
                action: event.action.clone(),
                reason_hash: hex::encode(&event.reason_hash),
                creation_day: event.creation_day as i64,
                raw_payload: event_bytes.clone(),
                signature: Some(hex::encode(&request.signature)),
            })
            .await
            .map_err(store_error)?;

        let conductor_event = ConductorEvent::new("moderation_event", event.creation_day, event_bytes)
            .with_metadata("stage_instance", stage_instance.to_string())
            .with_metadata("event_id", event_id.clone());
        let receipt = self
            .conductor
            .submit_event(conductor_event)
            .await
            .map_err(conductor_error)?;

        info!(event_id, stage_instance, "moderation event recorded and submitted");
        Ok((event_id, receipt))
    }

    // Peers -----------------------------------------------------------------

    /// Trusted peers and their hex public keys
    pub fn trusted_peers(&self) -> BTreeMap<String, String> {
        self.trust_store.snapshot()
    }
}
