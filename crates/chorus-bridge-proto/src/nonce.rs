//! Deterministic message identity
//!
//! Two bridges observing the same inner event must enqueue byte-identical
//! outbound envelopes, so downstream replay caches collapse them to one
//! delivery. The outbound nonce is therefore derived from the message's
//! natural keys, never from randomness or wall-clock time.

use prost::Message;

use crate::kind::MessageKind;
use crate::messages::*;

/// First 8 bytes of `BLAKE3(identifier)` as a big-endian u64
pub fn deterministic_nonce(identifier: &str) -> u64 {
    let digest = blake3::hash(identifier.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(prefix)
}

/// A decoded inner message, tagged by kind
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    PostAnnouncement(PostAnnouncement),
    UserRegistration(UserRegistration),
    DayProof(DayProofMessage),
    ModerationEvent(ModerationEvent),
    InstanceJoinRequest(InstanceJoinRequest),
    CommunityCreation(CommunityCreation),
    UserUpdate(UserUpdate),
    CommunityUpdate(CommunityUpdate),
    CommunityMembershipUpdate(CommunityMembershipUpdate),
    BlacklistUpdate(BlacklistUpdate),
}

impl DecodedMessage {
    /// Decode `message_data` according to the envelope's message type
    pub fn decode(kind: MessageKind, data: &[u8]) -> Result<Self, prost::DecodeError> {
        Ok(match kind {
            MessageKind::PostAnnouncement => Self::PostAnnouncement(PostAnnouncement::decode(data)?),
            MessageKind::UserRegistration => Self::UserRegistration(UserRegistration::decode(data)?),
            MessageKind::DayProof => Self::DayProof(DayProofMessage::decode(data)?),
            MessageKind::ModerationEvent => Self::ModerationEvent(ModerationEvent::decode(data)?),
            MessageKind::InstanceJoinRequest => {
                Self::InstanceJoinRequest(InstanceJoinRequest::decode(data)?)
            }
            MessageKind::CommunityCreation => {
                Self::CommunityCreation(CommunityCreation::decode(data)?)
            }
            MessageKind::UserUpdate => Self::UserUpdate(UserUpdate::decode(data)?),
            MessageKind::CommunityUpdate => Self::CommunityUpdate(CommunityUpdate::decode(data)?),
            MessageKind::CommunityMembershipUpdate => {
                Self::CommunityMembershipUpdate(CommunityMembershipUpdate::decode(data)?)
            }
            MessageKind::BlacklistUpdate => Self::BlacklistUpdate(BlacklistUpdate::decode(data)?),
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::PostAnnouncement(_) => MessageKind::PostAnnouncement,
            Self::UserRegistration(_) => MessageKind::UserRegistration,
            Self::DayProof(_) => MessageKind::DayProof,
            Self::ModerationEvent(_) => MessageKind::ModerationEvent,
            Self::InstanceJoinRequest(_) => MessageKind::InstanceJoinRequest,
            Self::CommunityCreation(_) => MessageKind::CommunityCreation,
            Self::UserUpdate(_) => MessageKind::UserUpdate,
            Self::CommunityUpdate(_) => MessageKind::CommunityUpdate,
            Self::CommunityMembershipUpdate(_) => MessageKind::CommunityMembershipUpdate,
            Self::BlacklistUpdate(_) => MessageKind::BlacklistUpdate,
        }
    }

    /// The Conductor epoch: the day field of the inner message
    ///
    /// Every variant carries one; wall-clock time is never a substitute.
    pub fn epoch(&self) -> u64 {
        match self {
            Self::PostAnnouncement(m) => m.creation_day,
            Self::UserRegistration(m) => m.registration_day,
            Self::DayProof(m) => m.day_number,
            Self::ModerationEvent(m) => m.creation_day,
            Self::InstanceJoinRequest(m) => m.day_number,
            Self::CommunityCreation(m) => m.creation_day,
            Self::UserUpdate(m) => m.update_day,
            Self::CommunityUpdate(m) => m.update_day,
            Self::CommunityMembershipUpdate(m) => m.update_day,
            Self::BlacklistUpdate(m) => m.day_number,
        }
    }

    /// Canonical identifier string over the message's natural keys
    pub fn fanout_identifier(&self) -> String {
        match self {
            Self::PostAnnouncement(m) => format!(
                "{}-{}-{}",
                hex::encode(&m.post_id),
                m.creation_day,
                m.order_index
            ),
            Self::UserRegistration(m) => {
                format!("{}-{}", hex::encode(&m.user_pubkey), m.registration_day)
            }
            Self::DayProof(m) => {
                format!("{}-{}", m.day_number, hex::encode(&m.canonical_proof_hash))
            }
            Self::ModerationEvent(m) => format!(
                "{}-{}-{}",
                hex::encode(&m.target_ref),
                m.action,
                m.creation_day
            ),
            Self::InstanceJoinRequest(m) => format!("{}-{}", m.instance_id, m.day_number),
            Self::CommunityCreation(m) => {
                format!("{}-{}", hex::encode(&m.community_id), m.creation_day)
            }
            Self::UserUpdate(m) => format!("{}-{}", hex::encode(&m.user_pubkey), m.update_day),
            Self::CommunityUpdate(m) => {
                format!("{}-{}", hex::encode(&m.community_id), m.update_day)
            }
            Self::CommunityMembershipUpdate(m) => format!(
                "{}-{}-{}-{}",
                hex::encode(&m.community_id),
                hex::encode(&m.user_pubkey),
                m.action,
                m.update_day
            ),
            Self::BlacklistUpdate(m) => format!("{}-{}", m.instance_id, m.day_number),
        }
    }

    /// Nonce for the re-signed outbound copy of this message
    pub fn outbound_nonce(&self) -> u64 {
        deterministic_nonce(&self.fanout_identifier())
    }

    /// Serialize back to `message_data` bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::PostAnnouncement(m) => m.encode_to_vec(),
            Self::UserRegistration(m) => m.encode_to_vec(),
            Self::DayProof(m) => m.encode_to_vec(),
            Self::ModerationEvent(m) => m.encode_to_vec(),
            Self::InstanceJoinRequest(m) => m.encode_to_vec(),
            Self::CommunityCreation(m) => m.encode_to_vec(),
            Self::UserUpdate(m) => m.encode_to_vec(),
            Self::CommunityUpdate(m) => m.encode_to_vec(),
            Self::CommunityMembershipUpdate(m) => m.encode_to_vec(),
            Self::BlacklistUpdate(m) => m.encode_to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_post() -> PostAnnouncement {
        PostAnnouncement {
            post_id: b"post123".to_vec(),
            author_pubkey: vec![7u8; 32],
            content_hash: b"content789".to_vec(),
            order_index: 1,
            creation_day: 100,
        }
    }

    #[test]
    fn test_nonce_is_deterministic() {
        let a = DecodedMessage::PostAnnouncement(sample_post());
        let b = DecodedMessage::PostAnnouncement(sample_post());
        assert_eq!(a.outbound_nonce(), b.outbound_nonce());
    }

    #[test]
    fn test_nonce_changes_with_natural_keys() {
        let a = DecodedMessage::PostAnnouncement(sample_post());
        let mut other = sample_post();
        other.order_index = 2;
        let b = DecodedMessage::PostAnnouncement(other);
        assert_ne!(a.outbound_nonce(), b.outbound_nonce());
    }

    #[test]
    fn test_post_identifier_shape() {
        let decoded = DecodedMessage::PostAnnouncement(sample_post());
        assert_eq!(
            decoded.fanout_identifier(),
            format!("{}-100-1", hex::encode(b"post123"))
        );
    }

    #[test]
    fn test_epoch_per_variant() {
        let post = DecodedMessage::PostAnnouncement(sample_post());
        assert_eq!(post.epoch(), 100);

        let join = DecodedMessage::InstanceJoinRequest(InstanceJoinRequest {
            instance_id: "stage-b".into(),
            instance_pubkey: vec![1u8; 32],
            contact_info: String::new(),
            day_number: 12,
        });
        assert_eq!(join.epoch(), 12);
    }

    #[test]
    fn test_decode_dispatches_by_kind() {
        let bytes = sample_post().encode_to_vec();
        let decoded = DecodedMessage::decode(MessageKind::PostAnnouncement, &bytes).unwrap();
        assert_eq!(decoded.kind(), MessageKind::PostAnnouncement);
        assert_eq!(decoded.to_bytes(), bytes);
    }
}
