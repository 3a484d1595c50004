//! Message type tags
//!
//! `message_type` travels as a string on the wire; dispatch keys on this
//! enum so an unknown tag is caught once, at decode time.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown message type '{0}'")]
pub struct UnknownMessageType(pub String);

/// Enumerated tag of the inner message carried by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PostAnnouncement,
    UserRegistration,
    DayProof,
    ModerationEvent,
    InstanceJoinRequest,
    CommunityCreation,
    UserUpdate,
    CommunityUpdate,
    CommunityMembershipUpdate,
    BlacklistUpdate,
}

impl MessageKind {
    pub const ALL: [MessageKind; 10] = [
        MessageKind::PostAnnouncement,
        MessageKind::UserRegistration,
        MessageKind::DayProof,
        MessageKind::ModerationEvent,
        MessageKind::InstanceJoinRequest,
        MessageKind::CommunityCreation,
        MessageKind::UserUpdate,
        MessageKind::CommunityUpdate,
        MessageKind::CommunityMembershipUpdate,
        MessageKind::BlacklistUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostAnnouncement => "PostAnnouncement",
            Self::UserRegistration => "UserRegistration",
            Self::DayProof => "DayProof",
            Self::ModerationEvent => "ModerationEvent",
            Self::InstanceJoinRequest => "InstanceJoinRequest",
            Self::CommunityCreation => "CommunityCreation",
            Self::UserUpdate => "UserUpdate",
            Self::CommunityUpdate => "CommunityUpdate",
            Self::CommunityMembershipUpdate => "CommunityMembershipUpdate",
            Self::BlacklistUpdate => "BlacklistUpdate",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = UnknownMessageType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PostAnnouncement" => Ok(Self::PostAnnouncement),
            "UserRegistration" => Ok(Self::UserRegistration),
            "DayProof" => Ok(Self::DayProof),
            "ModerationEvent" => Ok(Self::ModerationEvent),
            "InstanceJoinRequest" => Ok(Self::InstanceJoinRequest),
            "CommunityCreation" => Ok(Self::CommunityCreation),
            "UserUpdate" => Ok(Self::UserUpdate),
            "CommunityUpdate" => Ok(Self::CommunityUpdate),
            "CommunityMembershipUpdate" => Ok(Self::CommunityMembershipUpdate),
            "BlacklistUpdate" => Ok(Self::BlacklistUpdate),
            other => Err(UnknownMessageType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_kinds_roundtrip_through_strings() {
        for kind in MessageKind::ALL {
            assert_eq!(kind.as_str().parse::<MessageKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        assert!("NotAMessage".parse::<MessageKind>().is_err());
    }
}
