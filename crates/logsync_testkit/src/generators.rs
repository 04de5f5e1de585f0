//! Property-based test generators using proptest.
//!
//! Provides strategies for generating message lists that keep the
//! invariants a remote log guarantees: unique `(timestamp, sequence)` ids,
//! and pages sorted in the requested order.

use logsync_protocol::{ConsensusTimestamp, Encoding, Message, Order};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Strategy for generating consensus timestamps in a small range, so that
/// generated lists collide often.
pub fn timestamp_strategy() -> impl Strategy<Value = ConsensusTimestamp> {
    (0u64..200, prop_oneof![3 => Just(0u32), 1 => 0u32..1_000_000_000])
        .prop_map(|(seconds, nanos)| ConsensusTimestamp::new(seconds, nanos))
}

/// Strategy for generating a query order.
pub fn order_strategy() -> impl Strategy<Value = Order> {
    prop_oneof![Just(Order::Asc), Just(Order::Desc)]
}

/// Strategy for generating a payload encoding.
pub fn encoding_strategy() -> impl Strategy<Value = Encoding> {
    prop_oneof![Just(Encoding::Base64), Just(Encoding::Utf8)]
}

/// Strategy for generating valid collection ids (`shard.realm.num`).
pub fn collection_id_strategy() -> impl Strategy<Value = String> {
    (0u32..3, 0u32..3, 1u64..100_000).prop_map(|(s, r, n)| format!("{s}.{r}.{n}"))
}

/// Strategy for generating one message.
///
/// The sequence number is derived from the timestamp, so two generated
/// messages with the same timestamp are the same message.
pub fn message_strategy() -> impl Strategy<Value = Message> {
    timestamp_strategy().prop_map(message_at)
}

/// Strategy for generating a page: unique messages sorted in `order`.
pub fn page_strategy(order: Order, max_len: usize) -> impl Strategy<Value = Vec<Message>> {
    prop::collection::btree_set(timestamp_strategy(), 0..=max_len)
        .prop_map(move |timestamps| sorted_page(timestamps, order))
}

/// Strategy for generating an ordered page together with its order.
pub fn ordered_page_strategy(max_len: usize) -> impl Strategy<Value = (Order, Vec<Message>)> {
    order_strategy().prop_flat_map(move |order| (Just(order), page_strategy(order, max_len)))
}

/// Builds the message generated for `timestamp`.
pub fn message_at(timestamp: ConsensusTimestamp) -> Message {
    let sequence = timestamp.seconds * 10 + u64::from(timestamp.nanos % 10);
    Message::new(timestamp, sequence, "0.0.2", format!("bXNn{sequence}"))
}

fn sorted_page(timestamps: BTreeSet<ConsensusTimestamp>, order: Order) -> Vec<Message> {
    let mut messages: Vec<Message> = timestamps.into_iter().map(message_at).collect();
    if order.is_descending() {
        messages.reverse();
    }
    messages
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
