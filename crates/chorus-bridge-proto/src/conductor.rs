//! Conductor service wire types
//!
//! Protobuf shapes for the `chorus.conductor.ConductorBridge` gRPC service.
//! The HTTP client uses its own JSON bodies; these types serve the gRPC
//! transport only.

use prost::Message;
use std::collections::HashMap;

/// An event submitted for ordering
#[derive(Clone, PartialEq, Message)]
pub struct ConductorEventPb {
    #[prost(string, tag = "1")]
    pub event_type: String,
    #[prost(uint64, tag = "2")]
    pub epoch: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
    #[prost(map = "string, string", tag = "4")]
    pub metadata: HashMap<String, String>,
}

/// Ordering receipt for a submitted event
#[derive(Clone, PartialEq, Message)]
pub struct ConductorReceiptPb {
    #[prost(string, tag = "1")]
    pub event_hash: String,
    #[prost(uint64, tag = "2")]
    pub epoch: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConductorEventBatchPb {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<ConductorEventPb>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConductorReceiptBatchPb {
    #[prost(message, repeated, tag = "1")]
    pub receipts: Vec<ConductorReceiptPb>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DayProofRequestPb {
    #[prost(uint64, tag = "1")]
    pub day_number: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct DayProofResponsePb {
    #[prost(uint64, tag = "1")]
    pub day_number: u64,
    #[prost(string, tag = "2")]
    pub proof: String,
    #[prost(string, tag = "3")]
    pub proof_hash: String,
    #[prost(bool, tag = "4")]
    pub canonical: bool,
    #[prost(string, tag = "5")]
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_roundtrip_with_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("sender_instance".to_string(), "stage-a".to_string());
        let event = ConductorEventPb {
            event_type: "federation_envelope".to_string(),
            epoch: 100,
            payload: vec![1, 2, 3],
            metadata,
        };
        let decoded = ConductorEventPb::decode(event.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, event);
    }
}
