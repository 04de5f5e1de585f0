//! Sync engine state machine.
//!
//! Every collection key moves through `Idle -> Refreshing -> Idle` on a
//! refresh and `Idle -> LoadingMore -> Idle` on pagination. The two share
//! one busy flag per key, so cache writes for a key are totally ordered.
//! Different keys never wait on each other.

use crate::cache::{CacheEntry, CacheStore, CollectionKey};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::merge;
use crate::transport::Fetcher;
use logsync_protocol::Message;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// The current phase of one collection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing in flight.
    Idle,
    /// A refresh is in flight.
    Refreshing,
    /// An older page is being loaded.
    LoadingMore,
}

impl SyncPhase {
    /// Returns true if a cycle is in flight.
    pub fn is_busy(&self) -> bool {
        !matches!(self, SyncPhase::Idle)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Refresh cycles run (coalesced callers not included).
    pub refreshes: u64,
    /// Refreshes answered from cache without a network call.
    pub cache_hits: u64,
    /// Full-page fetches.
    pub full_fetches: u64,
    /// Delta fetches.
    pub delta_fetches: u64,
    /// Extra pages followed while catching up on a delta.
    pub catch_up_pages: u64,
    /// Older pages loaded.
    pub pages_loaded: u64,
    /// Failed fetch cycles.
    pub errors: u64,
    /// Time of the last successful network refresh.
    pub last_refresh: Option<SystemTime>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// What a refresh or load-more produced.
///
/// `messages` and `has_more` always describe the last known good state, even
/// when `error` is set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncOutcome {
    /// Cached messages after the operation.
    pub messages: Vec<Message>,
    /// Whether older pages remain.
    pub has_more: bool,
    /// Error raised by the fetcher, if any.
    pub error: Option<SyncError>,
    /// The cache was trusted and no network call was made.
    pub served_from_cache: bool,
    /// Number of messages added to the cache.
    pub added: usize,
    /// The operation was a no-op (nothing to load, or the key was busy).
    pub skipped: bool,
    /// The caller joined a refresh that was already in flight.
    pub coalesced: bool,
    /// Time of the last successful refresh of the entry.
    pub last_fetch_time: Option<SystemTime>,
}

impl SyncOutcome {
    fn from_entry(entry: Option<&CacheEntry>) -> Self {
        match entry {
            Some(entry) => Self {
                messages: entry.messages.clone(),
                has_more: entry.has_more,
                last_fetch_time: Some(entry.last_fetch_time),
                ..Self::default()
            },
            None => Self::default(),
        }
    }

    fn with_error(mut self, error: SyncError) -> Self {
        self.error = Some(error);
        self
    }

    fn skipped(mut self) -> Self {
        self.skipped = true;
        self
    }

    /// Returns true if no error was raised.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

struct SlotState {
    phase: SyncPhase,
    refresh_generation: u64,
    /// Callers waiting to share the in-flight refresh.
    joined: usize,
    /// Kept only while `joined > 0`.
    last_refresh: Option<SyncOutcome>,
}

/// Busy flag and last refresh result of one key.
struct KeySlot {
    state: Mutex<SlotState>,
    done: Notify,
}

/// Why a key could not be claimed.
struct Busy {
    phase: SyncPhase,
    generation: u64,
    joined: Option<JoinGuard>,
}

impl KeySlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                phase: SyncPhase::Idle,
                refresh_generation: 0,
                joined: 0,
                last_refresh: None,
            }),
            done: Notify::new(),
        }
    }

    /// Claims the busy flag, or reports what currently holds it.
    ///
    /// With `join`, a caller that finds a refresh in flight is registered
    /// to receive its result.
    fn try_begin(self: &Arc<Self>, phase: SyncPhase, join: bool) -> Result<PhaseGuard, Busy> {
        let mut state = self.state.lock();
        if state.phase.is_busy() {
            let joined = (join && state.phase == SyncPhase::Refreshing).then(|| {
                state.joined += 1;
                JoinGuard {
                    slot: Arc::clone(self),
                }
            });
            return Err(Busy {
                phase: state.phase,
                generation: state.refresh_generation,
                joined,
            });
        }
        state.phase = phase;
        Ok(PhaseGuard {
            slot: Arc::clone(self),
        })
    }

    fn phase(&self) -> SyncPhase {
        self.state.lock().phase
    }

    fn record_refresh(&self, outcome: &SyncOutcome) {
        let mut state = self.state.lock();
        state.refresh_generation += 1;
        if state.joined > 0 {
            state.last_refresh = Some(outcome.clone());
        }
    }
}

/// Releases the busy flag when dropped, even if the operation was cancelled.
struct PhaseGuard {
    slot: Arc<KeySlot>,
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        self.slot.state.lock().phase = SyncPhase::Idle;
        self.slot.done.notify_waiters();
    }
}

/// A caller's claim on the result of an in-flight refresh.
///
/// The shared result is released once the last claim is dropped.
struct JoinGuard {
    slot: Arc<KeySlot>,
}

impl JoinGuard {
    /// Returns the refresh result if one completed after `generation`.
    fn take(self, generation: u64) -> Option<SyncOutcome> {
        let state = self.slot.state.lock();
        if state.refresh_generation > generation {
            state.last_refresh.clone()
        } else {
            None
        }
    }
}

impl Drop for JoinGuard {
    fn drop(&mut self) {
        let mut state = self.slot.state.lock();
        state.joined -= 1;
        if state.joined == 0 {
            state.last_refresh = None;
        }
    }
}

/// The sync engine keeps cache entries of remote collections up to date.
///
/// One engine owns the busy flags for the keys it serves; share the engine
/// (behind an `Arc`) rather than pointing two engines at one store.
pub struct SyncEngine<F: Fetcher, S: CacheStore> {
    config: SyncConfig,
    fetcher: Arc<F>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<CollectionKey, Arc<KeySlot>>>,
    stats: RwLock<SyncStats>,
}

impl<F: Fetcher, S: CacheStore> SyncEngine<F, S> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, fetcher: F, store: S) -> Self {
        Self {
            config,
            fetcher: Arc::new(fetcher),
            store: Arc::new(store),
            clock: Arc::new(SystemClock),
            slots: Mutex::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Replaces the wall clock used for freshness decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the fetcher.
    pub fn fetcher(&self) -> &Arc<F> {
        &self.fetcher
    }

    /// Gets the cache store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Builds a key for `collection_id` from the engine configuration.
    pub fn key_for(&self, collection_id: impl Into<String>) -> CollectionKey {
        self.config.key_for(collection_id)
    }

    /// Gets the phase of a key.
    pub fn phase(&self, key: &CollectionKey) -> SyncPhase {
        self.slots
            .lock()
            .get(key)
            .map(|slot| slot.phase())
            .unwrap_or(SyncPhase::Idle)
    }

    /// Returns the cached state of a key without touching the network.
    pub fn snapshot(&self, key: &CollectionKey) -> SyncOutcome {
        let mut outcome = SyncOutcome::from_entry(self.store.get(key).as_ref());
        outcome.served_from_cache = true;
        outcome
    }

    fn slot(&self, key: &CollectionKey) -> Arc<KeySlot> {
        let mut slots = self.slots.lock();
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(KeySlot::new())),
        )
    }

    /// Forgets the slot of `key` once nobody else holds it.
    fn release_slot(&self, key: &CollectionKey, slot: Arc<KeySlot>) {
        let mut slots = self.slots.lock();
        drop(slot);
        if slots.get(key).is_some_and(|held| Arc::strong_count(held) == 1) {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.slots.lock().len()
    }

    /// Brings the cache entry for `key` up to date.
    ///
    /// With `invalidate` the entry is reloaded from scratch and replaced
    /// once the new first page arrives. Otherwise a fresh entry is served
    /// as-is, a stale one gets a delta fetch, and a missing or empty one
    /// gets a full page.
    ///
    /// A plain refresh that finds another refresh of the same key in flight
    /// waits for it and returns its result. An invalidating refresh waits
    /// for the key to go idle and then runs its own cycle. Fetch errors are
    /// reported in the outcome and never touch the cache entry.
    pub async fn refresh(&self, key: &CollectionKey, invalidate: bool) -> SyncOutcome {
        let slot = self.slot(key);
        let outcome = loop {
            let notified = slot.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let busy = match slot.try_begin(SyncPhase::Refreshing, !invalidate) {
                Ok(guard) => {
                    let outcome = self.run_refresh(key, invalidate).await;
                    slot.record_refresh(&outcome);
                    drop(guard);
                    break outcome;
                }
                Err(busy) => busy,
            };

            debug!(key = %key, phase = ?busy.phase, "key busy, waiting");
            notified.await;

            if let Some(mut outcome) = busy.joined.and_then(|j| j.take(busy.generation)) {
                outcome.coalesced = true;
                break outcome;
            }
        };
        self.release_slot(key, slot);
        outcome
    }

    async fn run_refresh(&self, key: &CollectionKey, invalidate: bool) -> SyncOutcome {
        self.stats.write().refreshes += 1;

        let now = self.clock.now();
        let cached = self.store.get(key);

        if invalidate {
            debug!(key = %key, "reloading invalidated entry");
        } else if let Some(entry) = cached
            .as_ref()
            .filter(|e| e.is_fresh(now, self.config.cache_timeout))
        {
            self.stats.write().cache_hits += 1;
            debug!(key = %key, "serving from cache");
            let mut outcome = SyncOutcome::from_entry(Some(entry));
            outcome.served_from_cache = true;
            return outcome;
        }

        let result = match cached.as_ref().filter(|e| !invalidate && !e.is_empty()) {
            Some(entry) => self.catch_up(key, entry, now).await,
            None => self.reload(key, now).await,
        };

        match result {
            Ok((entry, added)) => {
                self.store.put(key.clone(), entry.clone());
                {
                    let mut stats = self.stats.write();
                    stats.last_refresh = Some(now);
                    stats.last_error = None;
                }
                let mut outcome = SyncOutcome::from_entry(Some(&entry));
                outcome.added = added;
                outcome
            }
            Err(err) => {
                warn!(key = %key, error = %err, "refresh failed");
                self.record_error(&err);
                SyncOutcome::from_entry(cached.as_ref()).with_error(err)
            }
        }
    }

    /// Fetches the full first page and builds a new entry from it.
    async fn reload(
        &self,
        key: &CollectionKey,
        now: SystemTime,
    ) -> Result<(CacheEntry, usize), SyncError> {
        let page = self.fetcher.fetch_latest(key).await?;
        self.stats.write().full_fetches += 1;

        let entry = CacheEntry::from_page(page, now);
        let added = entry.messages.len();
        info!(key = %key, messages = added, has_more = entry.has_more, "loaded collection");
        Ok((entry, added))
    }

    /// Fetches everything newer than the entry's frontier and merges it.
    ///
    /// A delta that spans more than `max_catch_up_pages` pages is abandoned
    /// in favor of a full reload, so the cache never holds a gap.
    async fn catch_up(
        &self,
        key: &CollectionKey,
        entry: &CacheEntry,
        now: SystemTime,
    ) -> Result<(CacheEntry, usize), SyncError> {
        let Some(frontier) = entry.frontier_timestamp else {
            return self.reload(key, now).await;
        };

        let mut page = self.fetcher.fetch_since(key, frontier).await?;
        self.stats.write().delta_fetches += 1;

        let mut delta = std::mem::take(&mut page.messages);
        let mut pages = 1u32;
        while let Some(token) = page.continuation_token.take() {
            if pages >= self.config.max_catch_up_pages {
                warn!(key = %key, pages, "delta exceeds catch-up budget, reloading");
                return self.reload(key, now).await;
            }
            page = self.fetcher.fetch_by_token(key, &token).await?;
            pages += 1;
            self.stats.write().catch_up_pages += 1;
            delta.append(&mut page.messages);
        }

        let messages = merge::merge(&entry.messages, &delta, key.order);
        let added = messages.len() - entry.messages.len();
        debug!(key = %key, fetched = delta.len(), added, "merged delta");

        // The older end belongs to load_more; a delta never moves it.
        let mut next = CacheEntry {
            messages,
            last_fetch_time: now,
            frontier_timestamp: entry.frontier_timestamp,
            has_more: entry.has_more,
            continuation_token: entry.continuation_token.clone(),
        };
        next.refresh_frontier();
        Ok((next, added))
    }

    /// Loads the next older page for `key`.
    ///
    /// Returns a skipped outcome without any fetch when there is nothing
    /// more to load or another cycle for the key is in flight. Freshness
    /// bookkeeping (`last_fetch_time`, frontier) is left untouched.
    pub async fn load_more(&self, key: &CollectionKey) -> SyncOutcome {
        let slot = self.slot(key);
        let outcome = match slot.try_begin(SyncPhase::LoadingMore, false) {
            Ok(guard) => {
                let outcome = self.run_load_more(key).await;
                drop(guard);
                outcome
            }
            Err(busy) => {
                debug!(key = %key, phase = ?busy.phase, "key busy, skipping load more");
                SyncOutcome::from_entry(self.store.get(key).as_ref()).skipped()
            }
        };
        self.release_slot(key, slot);
        outcome
    }

    async fn run_load_more(&self, key: &CollectionKey) -> SyncOutcome {
        let Some(entry) = self.store.get(key) else {
            return SyncOutcome::default().skipped();
        };
        let token = match (&entry.continuation_token, entry.has_more) {
            (Some(token), true) => token.clone(),
            _ => return SyncOutcome::from_entry(Some(&entry)).skipped(),
        };

        match self.fetcher.fetch_by_token(key, &token).await {
            Ok(page) => {
                let messages = merge::append_older(&entry.messages, &page.messages, key.order);
                let added = messages.len() - entry.messages.len();
                let next = CacheEntry {
                    messages,
                    has_more: page.has_more,
                    continuation_token: page.continuation_token,
                    ..entry
                };
                self.store.put(key.clone(), next.clone());
                self.stats.write().pages_loaded += 1;
                debug!(key = %key, added, has_more = next.has_more, "loaded older page");

                let mut outcome = SyncOutcome::from_entry(Some(&next));
                outcome.added = added;
                outcome
            }
            Err(err) => {
                warn!(key = %key, error = %err, "load more failed");
                self.record_error(&err);
                SyncOutcome::from_entry(Some(&entry)).with_error(err)
            }
        }
    }

    fn record_error(&self, error: &SyncError) {
        let mut stats = self.stats.write();
        stats.errors += 1;
        stats.last_error = Some(error.to_string());
    }
}
