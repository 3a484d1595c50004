//! Row models for bridge tables

use sqlx::FromRow;

/// Delivery ledger lifecycle: `queued → retrying* → delivered | failed`
///
/// `Sending` is the transient in-flight marker a worker CASes a row into
/// while an attempt is running. `Delivered` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStatus {
    Queued,
    Sending,
    Retrying,
    Delivered,
    Failed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Retrying => "retrying",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "sending" => Some(Self::Sending),
            "retrying" => Some(Self::Retrying),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A queued outbound federation push to another Stage instance
#[derive(Debug, Clone, FromRow)]
pub struct OutboundLedgerRow {
    pub id: String,
    pub target_instance_url: String,
    pub message_type: String,
    /// Serialized envelope with an empty signature; re-signed at send time
    pub raw_envelope: Vec<u8>,
    pub status: String,
    pub attempts: i32,
    pub retry_at: i64,
    pub last_attempt_at: Option<i64>,
    pub created_at: i64,
}

/// A queued ActivityPub export delivery
#[derive(Debug, Clone, FromRow)]
pub struct ExportLedgerRow {
    pub id: String,
    pub stage_instance: String,
    pub object_hash: String,
    pub ap_type: String,
    pub target_url: String,
    pub status: String,
    pub attempts: i32,
    pub published_ts: i64,
    pub retry_at: i64,
    pub last_attempt_at: Option<i64>,
    pub created_at: i64,
    /// Original export request JSON, replayed by the delivery worker
    pub raw_payload: Vec<u8>,
}

/// Fields for a new export ledger row
#[derive(Debug, Clone)]
pub struct NewExport {
    pub stage_instance: String,
    pub object_hash: String,
    pub ap_type: String,
    pub target_url: String,
    pub published_ts: i64,
    pub raw_payload: Vec<u8>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ModerationEventRow {
    pub id: String,
    pub target_ref: String,
    pub action: String,
    pub reason_hash: String,
    pub creation_day: i64,
    pub raw_payload: Vec<u8>,
    pub stage_instance: String,
    pub signature: Option<String>,
    pub received_at: i64,
}

/// Fields for a new moderation record
#[derive(Debug, Clone)]
pub struct NewModerationEvent {
    pub stage_instance: String,
    pub target_ref: String,
    pub action: String,
    pub reason_hash: String,
    pub creation_day: i64,
    pub raw_payload: Vec<u8>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FederatedPostRow {
    pub post_id: String,
    pub author_pubkey: String,
    pub content_hash: String,
    pub order_index: i64,
    pub creation_day: i64,
    pub sender_instance: String,
    pub received_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct RegisteredUserRow {
    pub user_pubkey: String,
    pub registration_day: i64,
    pub day_proof_hash: String,
    pub sender_instance: String,
    pub received_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct FederatedCommunityRow {
    pub community_id: String,
    pub creator_pubkey: String,
    pub name: String,
    pub description: String,
    pub creation_day: i64,
    pub sender_instance: String,
    pub received_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            LedgerStatus::Queued,
            LedgerStatus::Sending,
            LedgerStatus::Retrying,
            LedgerStatus::Delivered,
            LedgerStatus::Failed,
        ] {
            assert_eq!(LedgerStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LedgerStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(LedgerStatus::Delivered.is_terminal());
        assert!(LedgerStatus::Failed.is_terminal());
        assert!(!LedgerStatus::Retrying.is_terminal());
        assert!(!LedgerStatus::Sending.is_terminal());
    }
}
