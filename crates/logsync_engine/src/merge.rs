//! Merging fetched pages into a cached list.
//!
//! Both functions keep the cached list as-is and only add fetched entries
//! whose `(timestamp, sequence)` identity is not already present. Neither
//! re-sorts: the remote is assumed to return consistently ordered pages,
//! and the side a page is attached to follows from what kind of page it is.

use logsync_protocol::{Message, MessageId, Order};
use std::collections::HashSet;

/// Merges entries newer than anything cached.
///
/// New entries go to the "near" end: the front for descending lists, the
/// back for ascending ones. `delta` must already be in `order`.
pub fn merge(cached: &[Message], delta: &[Message], order: Order) -> Vec<Message> {
    let fresh = unseen(cached, delta);
    if fresh.is_empty() {
        return cached.to_vec();
    }
    match order {
        Order::Desc => concat(&fresh, cached),
        Order::Asc => concat(cached, &fresh),
    }
}

/// Attaches an older page at the "far" end.
///
/// The page goes to the back for descending lists and to the front for
/// ascending ones. `older_page` must already be in `order`.
pub fn append_older(cached: &[Message], older_page: &[Message], order: Order) -> Vec<Message> {
    let fresh = unseen(cached, older_page);
    if fresh.is_empty() {
        return cached.to_vec();
    }
    match order {
        Order::Desc => concat(cached, &fresh),
        Order::Asc => concat(&fresh, cached),
    }
}

/// Returns true if adjacent timestamps respect `order` and identities are unique.
pub fn is_ordered(messages: &[Message], order: Order) -> bool {
    let sorted = messages.windows(2).all(|pair| match order {
        Order::Desc => pair[0].consensus_timestamp >= pair[1].consensus_timestamp,
        Order::Asc => pair[0].consensus_timestamp <= pair[1].consensus_timestamp,
    });
    let mut seen = HashSet::with_capacity(messages.len());
    sorted && messages.iter().all(|m| seen.insert(m.id()))
}

/// Entries of `incoming` whose identity is absent from `cached`, also
/// dropping repeats inside `incoming` itself.
fn unseen(cached: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut seen: HashSet<MessageId> = cached.iter().map(Message::id).collect();
    incoming
        .iter()
        .filter(|m| seen.insert(m.id()))
        .cloned()
        .collect()
}

fn concat(front: &[Message], back: &[Message]) -> Vec<Message> {
    let mut out = Vec::with_capacity(front.len() + back.len());
    out.extend_from_slice(front);
    out.extend_from_slice(back);
    out
}
