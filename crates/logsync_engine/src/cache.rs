//! Cache store for synced collections.
//!
//! The store is plain keyed storage: it never talks to the network and
//! never decides freshness. Writers for one key are serialized by the
//! engine's busy flag, so implementations only need map-level locking.

use crate::transport::{ContinuationToken, FetchedPage};
use logsync_protocol::{ConsensusTimestamp, Encoding, Message, Order};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Identifies one cache entry: a collection plus the shape of the query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    /// Remote collection identifier.
    pub collection_id: String,
    /// Page size.
    pub limit: u32,
    /// Order of the cached list.
    pub order: Order,
    /// Payload transfer encoding.
    pub encoding: Encoding,
}

impl CollectionKey {
    /// Creates a key.
    pub fn new(
        collection_id: impl Into<String>,
        limit: u32,
        order: Order,
        encoding: Encoding,
    ) -> Self {
        Self {
            collection_id: collection_id.into(),
            limit,
            order,
            encoding,
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}?limit={}&order={}&encoding={}",
            self.collection_id, self.limit, self.order, self.encoding
        )
    }
}

/// Cached state of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Messages in the key's order, unique by identity.
    pub messages: Vec<Message>,
    /// Wall-clock time of the last successful refresh.
    pub last_fetch_time: SystemTime,
    /// Timestamp of the newest cached message, used as the delta cursor.
    pub frontier_timestamp: Option<ConsensusTimestamp>,
    /// Whether an older page exists beyond what is loaded.
    ///
    /// Tracks the older end only. Delta refreshes leave it alone; newer
    /// pages are followed during the refresh itself.
    pub has_more: bool,
    /// Pointer to the next older page. Like `has_more`, only `load_more`
    /// and full reloads move it.
    pub continuation_token: Option<ContinuationToken>,
}

impl CacheEntry {
    /// Builds an entry from a freshly fetched full page.
    pub fn from_page(page: FetchedPage, fetched_at: SystemTime) -> Self {
        let frontier_timestamp = newest_timestamp(&page.messages);
        Self {
            messages: page.messages,
            last_fetch_time: fetched_at,
            frontier_timestamp,
            has_more: page.has_more,
            continuation_token: page.continuation_token,
        }
    }

    /// Returns true if the entry may be served without a network call.
    ///
    /// A clock that moved backwards counts as zero elapsed time.
    pub fn is_fresh(&self, now: SystemTime, cache_timeout: Duration) -> bool {
        let age = now
            .duration_since(self.last_fetch_time)
            .unwrap_or(Duration::ZERO);
        age < cache_timeout
    }

    /// Recomputes the frontier from the current messages.
    pub fn refresh_frontier(&mut self) {
        self.frontier_timestamp = newest_timestamp(&self.messages);
    }

    /// Returns true if no messages are cached.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Returns the newest timestamp in a list, regardless of its order.
pub fn newest_timestamp(messages: &[Message]) -> Option<ConsensusTimestamp> {
    messages.iter().map(|m| m.consensus_timestamp).max()
}

/// Keyed storage for cache entries.
pub trait CacheStore: Send + Sync {
    /// Returns a copy of the entry for `key`.
    fn get(&self, key: &CollectionKey) -> Option<CacheEntry>;

    /// Stores `entry`, replacing any previous entry for `key`.
    fn put(&self, key: CollectionKey, entry: CacheEntry);

    /// Drops the entry for `key`. Returns true if one existed.
    fn invalidate(&self, key: &CollectionKey) -> bool;

    /// Number of stored entries.
    fn len(&self) -> usize;

    /// Returns true if no entries are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    fn clear(&self);
}

impl<S: CacheStore + ?Sized> CacheStore for Arc<S> {
    fn get(&self, key: &CollectionKey) -> Option<CacheEntry> {
        (**self).get(key)
    }

    fn put(&self, key: CollectionKey, entry: CacheEntry) {
        (**self).put(key, entry)
    }

    fn invalidate(&self, key: &CollectionKey) -> bool {
        (**self).invalidate(key)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn clear(&self) {
        (**self).clear()
    }
}

struct Slot {
    entry: CacheEntry,
    last_used: u64,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<CollectionKey, Slot>,
    clock: u64,
}

impl Inner {
    fn touch(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// In-memory cache store.
///
/// Unbounded by default. [`MemoryCacheStore::bounded`] caps the number of
/// keys and evicts the least recently used one when the cap is exceeded.
#[derive(Default)]
pub struct MemoryCacheStore {
    inner: Mutex<Inner>,
    max_entries: Option<usize>,
}

impl MemoryCacheStore {
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding at most `max_entries` keys (minimum 1).
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries: Some(max_entries.max(1)),
        }
    }

    /// Returns the configured key cap.
    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    /// Returns true if `key` is stored, without counting as a use.
    pub fn contains(&self, key: &CollectionKey) -> bool {
        self.inner.lock().slots.contains_key(key)
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &CollectionKey) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        let tick = inner.touch();
        inner.slots.get_mut(key).map(|slot| {
            slot.last_used = tick;
            slot.entry.clone()
        })
    }

    fn put(&self, key: CollectionKey, entry: CacheEntry) {
        let mut inner = self.inner.lock();
        let tick = inner.touch();
        inner.slots.insert(
            key,
            Slot {
                entry,
                last_used: tick,
            },
        );

        if let Some(max) = self.max_entries {
            while inner.slots.len() > max {
                let oldest = inner
                    .slots
                    .iter()
                    .min_by_key(|(_, slot)| slot.last_used)
                    .map(|(key, _)| key.clone());
                match oldest {
                    Some(evicted) => {
                        inner.slots.remove(&evicted);
                        tracing::debug!(key = %evicted, "evicted cache entry");
                    }
                    None => break,
                }
            }
        }
    }

    fn invalidate(&self, key: &CollectionKey) -> bool {
        self.inner.lock().slots.remove(key).is_some()
    }

    fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    fn clear(&self) {
        self.inner.lock().slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> CollectionKey {
        CollectionKey::new(id, 2, Order::Desc, Encoding::Base64)
    }

    fn message(ts: u64, seq: u64) -> Message {
        Message::new(ConsensusTimestamp::from_seconds(ts), seq, "0.0.1", "")
    }

    fn entry(messages: Vec<Message>) -> CacheEntry {
        CacheEntry::from_page(
            FetchedPage::new(messages, None),
            SystemTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn key_display() {
        assert_eq!(key("topic-7").to_string(), "topic-7?limit=2&order=desc&encoding=base64");
    }

    #[test]
    fn entry_frontier_is_newest() {
        let e = entry(vec![message(100, 5), message(90, 4)]);
        assert_eq!(e.frontier_timestamp, Some(ConsensusTimestamp::from_seconds(100)));
        assert!(!e.has_more);

        let e = entry(vec![]);
        assert_eq!(e.frontier_timestamp, None);
        assert!(e.is_empty());
    }

    #[test]
    fn freshness_boundary() {
        let e = entry(vec![message(1, 1)]);
        let timeout = Duration::from_millis(1000);
        let at = |ms| SystemTime::UNIX_EPOCH + Duration::from_millis(ms);

        assert!(e.is_fresh(at(999), timeout));
        assert!(!e.is_fresh(at(1000), timeout));
        assert!(!e.is_fresh(at(1001), timeout));
    }

    #[test]
    fn clock_going_backwards_counts_as_fresh() {
        let mut e = entry(vec![]);
        e.last_fetch_time = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        assert!(e.is_fresh(SystemTime::UNIX_EPOCH, Duration::from_secs(1)));
    }

    #[test]
    fn memory_store_get_put_invalidate() {
        let store = MemoryCacheStore::new();
        assert!(store.is_empty());
        assert!(store.get(&key("a")).is_none());

        store.put(key("a"), entry(vec![message(1, 1)]));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key("a")).unwrap().messages.len(), 1);

        assert!(store.invalidate(&key("a")));
        assert!(!store.invalidate(&key("a")));
        assert!(store.get(&key("a")).is_none());
    }

    #[test]
    fn keys_differ_by_query_shape() {
        let store = MemoryCacheStore::new();
        let asc = CollectionKey::new("a", 2, Order::Asc, Encoding::Base64);
        store.put(key("a"), entry(vec![message(1, 1)]));
        assert!(store.get(&asc).is_none());
    }

    #[test]
    fn bounded_store_evicts_least_recently_used() {
        let store = MemoryCacheStore::bounded(2);
        store.put(key("a"), entry(vec![]));
        store.put(key("b"), entry(vec![]));

        // Touch "a" so "b" becomes the eviction candidate.
        store.get(&key("a"));
        store.put(key("c"), entry(vec![]));

        assert_eq!(store.len(), 2);
        assert!(store.contains(&key("a")));
        assert!(!store.contains(&key("b")));
        assert!(store.contains(&key("c")));
    }

    #[test]
    fn shared_store_through_arc() {
        let store = Arc::new(MemoryCacheStore::new());
        let handle: Arc<MemoryCacheStore> = Arc::clone(&store);
        handle.put(key("a"), entry(vec![]));
        assert_eq!(CacheStore::len(&store), 1);
        store.clear();
        assert!(CacheStore::is_empty(&handle));
    }
}
