//! Federation wire messages
//!
//! The outer `FederationEnvelope` authenticates a sender instance over an
//! opaque `message_data` payload; the inner variants are serialized
//! independently and carried as bytes. Every inner variant carries a day
//! field, which becomes the Conductor epoch.

use prost::Message;

/// Outer signed container for any federation message
#[derive(Clone, PartialEq, Message)]
pub struct FederationEnvelope {
    #[prost(string, tag = "1")]
    pub sender_instance: String,
    /// Deterministic per-message nonce (see [`crate::nonce`])
    #[prost(uint64, tag = "2")]
    pub nonce: u64,
    #[prost(string, tag = "3")]
    pub message_type: String,
    /// Serialized inner message; the signature covers exactly these bytes
    #[prost(bytes = "vec", tag = "4")]
    pub message_data: Vec<u8>,
    /// 64-byte Ed25519 detached signature over `message_data`
    #[prost(bytes = "vec", tag = "5")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PostAnnouncement {
    #[prost(bytes = "vec", tag = "1")]
    pub post_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub author_pubkey: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub content_hash: Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub order_index: u64,
    #[prost(uint64, tag = "5")]
    pub creation_day: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct UserRegistration {
    #[prost(bytes = "vec", tag = "1")]
    pub user_pubkey: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub registration_day: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub day_proof_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DayProofMessage {
    #[prost(uint64, tag = "1")]
    pub day_number: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub canonical_proof_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub validator_quorum_sig: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ModerationEvent {
    #[prost(bytes = "vec", tag = "1")]
    pub target_ref: Vec<u8>,
    #[prost(string, tag = "2")]
    pub action: String,
    #[prost(bytes = "vec", tag = "3")]
    pub reason_hash: Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub creation_day: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct InstanceJoinRequest {
    #[prost(string, tag = "1")]
    pub instance_id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub instance_pubkey: Vec<u8>,
    #[prost(string, tag = "3")]
    pub contact_info: String,
    #[prost(uint64, tag = "4")]
    pub day_number: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct CommunityCreation {
    #[prost(bytes = "vec", tag = "1")]
    pub community_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub creator_pubkey: Vec<u8>,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub description: String,
    #[prost(uint64, tag = "5")]
    pub creation_day: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct UserUpdate {
    #[prost(bytes = "vec", tag = "1")]
    pub user_pubkey: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub updated_fields_payload: Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub update_day: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct CommunityUpdate {
    #[prost(bytes = "vec", tag = "1")]
    pub community_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub updated_fields_payload: Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub update_day: u64,
}

/// Membership change: `action` is "join" or "leave"
#[derive(Clone, PartialEq, Message)]
pub struct CommunityMembershipUpdate {
    #[prost(bytes = "vec", tag = "1")]
    pub community_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub user_pubkey: Vec<u8>,
    #[prost(string, tag = "3")]
    pub action: String,
    #[prost(uint64, tag = "4")]
    pub update_day: u64,
}

/// Blacklist change: `action="add"` revokes trust; "remove" is unsupported
#[derive(Clone, PartialEq, Message)]
pub struct BlacklistUpdate {
    #[prost(string, tag = "1")]
    pub instance_id: String,
    #[prost(string, tag = "2")]
    pub action: String,
    #[prost(uint64, tag = "3")]
    pub day_number: u64,
}

impl FederationEnvelope {
    /// Decode an envelope from wire bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(data)
    }

    /// Encode the envelope to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = FederationEnvelope {
            sender_instance: "stage-a".to_string(),
            nonce: 42,
            message_type: "PostAnnouncement".to_string(),
            message_data: vec![1, 2, 3],
            signature: vec![0u8; 64],
        };
        let decoded = FederationEnvelope::from_bytes(&envelope.to_bytes()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_garbage_bytes_fail_decode() {
        assert!(FederationEnvelope::from_bytes(&[0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
