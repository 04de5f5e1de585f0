//! Remote log entries.

use crate::error::ProtocolResult;
use crate::query::Encoding;
use crate::timestamp::ConsensusTimestamp;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Multi-part metadata for a message split across several log entries.
///
/// Chunks are passed through untouched; reassembly belongs to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// 1-based index of this part.
    pub number: u32,
    /// Total number of parts.
    pub total: u32,
    /// Id of the transaction that carried the first part.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_transaction_id: Option<serde_json::Value>,
}

/// Dedup identity of a message within one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    /// Consensus timestamp.
    pub timestamp: ConsensusTimestamp,
    /// Sequence number.
    pub sequence: u64,
}

/// One immutable entry of a remote log.
///
/// # Fields
///
/// - `consensus_timestamp`: primary ordering key, increasing per source
/// - `sequence_number`: strictly increasing within one collection
/// - `payer_account_id`: who submitted the entry
/// - `message`: the encoded payload, opaque to the sync engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Consensus timestamp assigned by the remote source.
    pub consensus_timestamp: ConsensusTimestamp,
    /// Sequence number within the collection.
    pub sequence_number: u64,
    /// Identity of the submitter.
    pub payer_account_id: String,
    /// Encoded payload.
    pub message: String,
    /// Multi-part metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_info: Option<ChunkInfo>,
    /// Running hash reported by the source, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_hash: Option<String>,
    /// Collection the message belongs to, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
}

impl Message {
    /// Creates a message without chunk metadata.
    pub fn new(
        consensus_timestamp: ConsensusTimestamp,
        sequence_number: u64,
        payer_account_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            consensus_timestamp,
            sequence_number,
            payer_account_id: payer_account_id.into(),
            message: message.into(),
            chunk_info: None,
            running_hash: None,
            topic_id: None,
        }
    }

    /// Attaches chunk metadata.
    pub fn with_chunk_info(mut self, chunk_info: ChunkInfo) -> Self {
        self.chunk_info = Some(chunk_info);
        self
    }

    /// Sets the collection id.
    pub fn with_topic_id(mut self, topic_id: impl Into<String>) -> Self {
        self.topic_id = Some(topic_id.into());
        self
    }

    /// Returns the dedup identity `(timestamp, sequence)`.
    pub fn id(&self) -> MessageId {
        MessageId {
            timestamp: self.consensus_timestamp,
            sequence: self.sequence_number,
        }
    }

    /// Returns true if this message is one part of a chunked message.
    pub fn is_chunked(&self) -> bool {
        self.chunk_info.as_ref().is_some_and(|c| c.total > 1)
    }

    /// Decodes the payload according to the encoding it was fetched with.
    pub fn decode_payload(&self, encoding: Encoding) -> ProtocolResult<Vec<u8>> {
        match encoding {
            Encoding::Base64 => Ok(STANDARD.decode(self.message.as_bytes())?),
            Encoding::Utf8 => Ok(self.message.as_bytes().to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(seconds: u64) -> ConsensusTimestamp {
        ConsensusTimestamp::from_seconds(seconds)
    }

    #[test]
    fn identity_uses_timestamp_and_sequence() {
        let a = Message::new(ts(100), 5, "0.0.1", "aGk=");
        let b = Message::new(ts(100), 5, "0.0.2", "other");
        let c = Message::new(ts(100), 6, "0.0.1", "aGk=");
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn decode_base64_payload() {
        let msg = Message::new(ts(1), 1, "0.0.1", "aGVsbG8=");
        assert_eq!(msg.decode_payload(Encoding::Base64).unwrap(), b"hello");
        assert_eq!(msg.decode_payload(Encoding::Utf8).unwrap(), b"aGVsbG8=");

        let bad = Message::new(ts(1), 1, "0.0.1", "***");
        assert!(bad.decode_payload(Encoding::Base64).is_err());
    }

    #[test]
    fn wire_format() {
        let json = r#"{
            "consensus_timestamp": "1700000000.000000100",
            "sequence_number": 7,
            "payer_account_id": "0.0.1234",
            "message": "aGk=",
            "chunk_info": {"number": 1, "total": 2, "initial_transaction_id": {"nonce": 0}},
            "running_hash": "abc",
            "topic_id": "0.0.5"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.sequence_number, 7);
        assert_eq!(msg.consensus_timestamp.nanos, 100);
        assert!(msg.is_chunked());
        assert_eq!(msg.topic_id.as_deref(), Some("0.0.5"));

        let minimal = r#"{"consensus_timestamp":"5","sequence_number":1,"payer_account_id":"0.0.1","message":""}"#;
        let msg: Message = serde_json::from_str(minimal).unwrap();
        assert!(msg.chunk_info.is_none());
        assert!(!msg.is_chunked());
        let out = serde_json::to_string(&msg).unwrap();
        assert!(!out.contains("chunk_info"));
    }
}
