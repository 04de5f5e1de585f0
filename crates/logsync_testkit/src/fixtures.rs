//! Test fixtures and message helpers.
//!
//! Provides short constructors for messages and mirrors seeded with common
//! test scenarios.

use crate::mirror::MirrorLog;
use logsync_protocol::{ConsensusTimestamp, Message};

/// Collection used by the reference scenario.
pub const TOPIC_7: &str = "topic-7";

/// Creates a message at `seconds` with sequence number `sequence`.
pub fn msg(seconds: u64, sequence: u64) -> Message {
    Message::new(
        ConsensusTimestamp::from_seconds(seconds),
        sequence,
        "0.0.2",
        "",
    )
}

/// Creates messages from `(seconds, sequence)` pairs, keeping their order.
pub fn messages(pairs: &[(u64, u64)]) -> Vec<Message> {
    pairs.iter().map(|&(s, q)| msg(s, q)).collect()
}

/// Returns the `(seconds, sequence)` pairs of a message list.
pub fn ids(messages: &[Message]) -> Vec<(u64, u64)> {
    messages
        .iter()
        .map(|m| (m.consensus_timestamp.seconds, m.sequence_number))
        .collect()
}

/// Creates a mirror holding `pairs` in `collection`.
pub fn mirror_with(collection: &str, pairs: &[(u64, u64)]) -> MirrorLog {
    let mirror = MirrorLog::new();
    mirror.create_collection(collection);
    for message in messages(pairs) {
        mirror.insert(collection, message);
    }
    mirror
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Mirror for the reference `topic-7` walkthrough: three messages, so a
    /// first page of two leaves one older message behind.
    pub fn topic_7() -> MirrorLog {
        mirror_with(TOPIC_7, &[(80, 3), (90, 4), (100, 5)])
    }

    /// Mirror with `count` consecutive messages starting at `first_second`.
    pub fn long_log(collection: &str, first_second: u64, count: u64) -> MirrorLog {
        let pairs: Vec<(u64, u64)> = (0..count).map(|i| (first_second + i, i + 1)).collect();
        mirror_with(collection, &pairs)
    }
}
