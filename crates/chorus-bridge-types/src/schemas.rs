//! Request/response schemas shared between the pipeline and the HTTP edge

use serde::{Deserialize, Serialize};

/// A day proof annotated with the source it was obtained from
///
/// `proof` carries the hex-encoded proof bytes; `source` is either
/// `"conductor"` or the id of the Stage instance that relayed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayProofResponse {
    pub day_number: u64,
    pub proof: String,
    pub proof_hash: String,
    #[serde(default = "default_canonical")]
    pub canonical: bool,
    pub source: String,
}

fn default_canonical() -> bool {
    true
}

/// Request to record a moderation event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationEventRequest {
    /// Hex-encoded protobuf `ModerationEvent`
    pub moderation_event: String,
    /// Detached Ed25519 signature over the hex-serialized event
    #[serde(with = "serde_bytes_vec")]
    pub signature: Vec<u8>,
}

/// Request to export a Chorus post to ActivityPub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPubExportRequest {
    /// Hex-encoded protobuf `PostAnnouncement`
    pub chorus_post: String,
    /// Full markdown body of the post
    pub body_md: String,
    /// Detached Ed25519 signature over the hex-serialized post
    #[serde(with = "serde_bytes_vec")]
    pub signature: Vec<u8>,
}

/// An ActivityStreams Note, the outbound shape of a federated post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPubNote {
    #[serde(rename = "@context")]
    pub context: String,
    #[serde(rename = "type")]
    pub note_type: String,
    #[serde(rename = "attributedTo")]
    pub attributed_to: String,
    pub content: String,
    pub published: String,
    pub to: Vec<String>,
}

impl ActivityPubNote {
    pub fn new(attributed_to: String, content: String, published: String) -> Self {
        Self {
            context: "https://www.w3.org/ns/activitystreams".to_string(),
            note_type: "Note".to_string(),
            attributed_to,
            content,
            published,
            to: vec!["https://www.w3.org/ns/activitystreams#Public".to_string()],
        }
    }
}

/// Signature bytes travel as JSON arrays of u8, matching the Stage clients
mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Vec::<u8>::deserialize(deserializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_serializes_activitystreams_fields() {
        let note = ActivityPubNote::new(
            "https://bridge.example/actors/abcd".into(),
            "hello".into(),
            "2024-10-23T00:00:00+00:00".into(),
        );
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["@context"], "https://www.w3.org/ns/activitystreams");
        assert_eq!(json["type"], "Note");
        assert_eq!(json["attributedTo"], "https://bridge.example/actors/abcd");
        assert_eq!(json["to"][0], "https://www.w3.org/ns/activitystreams#Public");
    }

    #[test]
    fn test_day_proof_canonical_defaults_true() {
        let proof: DayProofResponse = serde_json::from_str(
            r#"{"day_number":7,"proof":"aa","proof_hash":"bb","source":"conductor"}"#,
        )
        .unwrap();
        assert!(proof.canonical);
    }
}
