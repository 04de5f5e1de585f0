//! Consumer-facing handle for one collection key.
//!
//! A [`Session`] owns the poller of its key and turns engine outcomes into
//! [`SessionView`]s for its subscribers. Disposing the session stops the
//! poller and cuts delivery: a refresh that was already in flight still
//! completes and writes the cache, but its result never reaches a callback.

use crate::cache::{CacheStore, CollectionKey};
use crate::error::{SyncError, SyncResult};
use crate::poller::{PollObserver, Poller, Scheduler};
use crate::state::{SyncEngine, SyncOutcome};
use crate::transport::Fetcher;
use logsync_protocol::Message;
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// What a subscriber sees.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionView {
    /// Cached messages in the key's order.
    pub messages: Vec<Message>,
    /// A refetch is running, or a refresh is running with nothing to show yet.
    pub loading: bool,
    /// Error of the last operation, shown alongside possibly stale messages.
    pub error: Option<SyncError>,
    /// Whether older pages remain.
    pub has_more: bool,
    /// An older page is being loaded.
    pub loading_more: bool,
}

/// Identifies a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Callback = Arc<dyn Fn(&SessionView) + Send + Sync>;

#[derive(Default)]
struct SharedState {
    view: SessionView,
    subscribers: Vec<(SubscriptionId, Callback)>,
    next_id: u64,
    refreshing: usize,
    refetching: usize,
}

impl SharedState {
    fn recompute_loading(&mut self) {
        self.view.loading =
            self.refetching > 0 || (self.refreshing > 0 && self.view.messages.is_empty());
    }

    fn apply(&mut self, outcome: &SyncOutcome) {
        self.view.messages = outcome.messages.clone();
        self.view.has_more = outcome.has_more;
        self.view.error = outcome.error.clone();
    }
}

/// State shared between a session, its poller and in-flight operations.
struct SessionShared {
    alive: AtomicBool,
    state: Mutex<SharedState>,
    // Held while callbacks run; dispose takes it to wait out a delivery.
    delivery: ReentrantMutex<()>,
}

impl SessionShared {
    fn new(initial: SessionView) -> Self {
        Self {
            alive: AtomicBool::new(true),
            state: Mutex::new(SharedState {
                view: initial,
                ..SharedState::default()
            }),
            delivery: ReentrantMutex::new(()),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Applies `change` and delivers the view if it changed.
    fn update(&self, change: impl FnOnce(&mut SharedState)) {
        let _delivering = self.delivery.lock();
        if !self.is_alive() {
            return;
        }

        let (view, subscribers) = {
            let mut state = self.state.lock();
            let before = state.view.clone();
            change(&mut state);
            state.recompute_loading();
            if state.view == before {
                return;
            }
            let subscribers: Vec<Callback> =
                state.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect();
            (state.view.clone(), subscribers)
        };

        for callback in subscribers {
            callback(&view);
        }
    }

    fn begin_refresh(&self) {
        self.update(|state| state.refreshing += 1);
    }

    fn finish_refresh(&self, outcome: &SyncOutcome) {
        self.update(|state| {
            state.refreshing = state.refreshing.saturating_sub(1);
            state.apply(outcome);
        });
    }
}

impl PollObserver for SessionShared {
    fn on_tick_start(&self) {
        self.begin_refresh();
    }

    fn on_tick(&self, outcome: &SyncOutcome) {
        self.finish_refresh(outcome);
    }
}

/// Handle a consumer holds for one collection key.
///
/// Must be opened inside a tokio runtime. Dropping the session disposes it.
pub struct Session<F: Fetcher + 'static, S: CacheStore + 'static> {
    key: CollectionKey,
    engine: Arc<SyncEngine<F, S>>,
    shared: Arc<SessionShared>,
    poller: Poller,
    initial_load: Mutex<Option<JoinHandle<()>>>,
}

impl<F: Fetcher + 'static, S: CacheStore + 'static> Session<F, S> {
    /// Opens a session: seeds the view from cache, starts an initial
    /// refresh and a poller ticking at the engine's poll interval.
    pub fn open<Sch: Scheduler>(
        engine: Arc<SyncEngine<F, S>>,
        key: CollectionKey,
        scheduler: &Sch,
    ) -> Self {
        let cached = engine.snapshot(&key);
        let shared = Arc::new(SessionShared::new(SessionView {
            messages: cached.messages,
            has_more: cached.has_more,
            ..SessionView::default()
        }));

        shared.begin_refresh();
        let initial_load = {
            let engine = Arc::clone(&engine);
            let shared = Arc::clone(&shared);
            let key = key.clone();
            tokio::spawn(async move {
                let outcome = engine.refresh(&key, false).await;
                shared.finish_refresh(&outcome);
            })
        };

        let ticker = scheduler.ticker(engine.config().poll_interval);
        let poller = Poller::spawn(
            Arc::clone(&engine),
            key.clone(),
            ticker,
            Arc::clone(&shared),
        );
        debug!(key = %key, "session opened");

        Self {
            key,
            engine,
            shared,
            poller,
            initial_load: Mutex::new(Some(initial_load)),
        }
    }

    /// Returns the session's key.
    pub fn key(&self) -> &CollectionKey {
        &self.key
    }

    /// Returns the engine behind the session.
    pub fn engine(&self) -> &Arc<SyncEngine<F, S>> {
        &self.engine
    }

    /// Returns the poller of the session.
    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    /// Returns the current view.
    pub fn view(&self) -> SessionView {
        self.shared.state.lock().view.clone()
    }

    /// Returns true until the session is disposed.
    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Registers a callback and immediately delivers the current view to it.
    ///
    /// Returns `Err(Disposed)` if the session has been disposed.
    pub fn subscribe(
        &self,
        callback: impl Fn(&SessionView) + Send + Sync + 'static,
    ) -> SyncResult<SubscriptionId> {
        let _delivering = self.shared.delivery.lock();
        self.ensure_alive()?;

        let callback: Callback = Arc::new(callback);
        let (id, view) = {
            let mut state = self.shared.state.lock();
            state.next_id += 1;
            let id = SubscriptionId(state.next_id);
            state.subscribers.push((id, Arc::clone(&callback)));
            (id, state.view.clone())
        };
        callback(&view);
        Ok(id)
    }

    /// Removes a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.shared.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sub, _)| *sub != id);
        state.subscribers.len() != before
    }

    /// Drops the cached entry and reloads it from scratch.
    ///
    /// Fetch errors land in the view; only a disposed session is an error.
    pub async fn refetch(&self) -> SyncResult<()> {
        self.ensure_alive()?;
        self.shared.update(|state| state.refetching += 1);

        let outcome = self.engine.refresh(&self.key, true).await;
        self.shared.update(|state| {
            state.refetching = state.refetching.saturating_sub(1);
            state.apply(&outcome);
        });
        Ok(())
    }

    /// Loads one older page.
    ///
    /// A no-op when there is nothing more to load or the key is busy.
    pub async fn load_more(&self) -> SyncResult<()> {
        self.ensure_alive()?;
        self.shared.update(|state| state.view.loading_more = true);

        let outcome = self.engine.load_more(&self.key).await;
        self.shared.update(|state| {
            state.view.loading_more = false;
            if !outcome.skipped {
                state.apply(&outcome);
            }
        });
        Ok(())
    }

    /// Stops polling and releases every callback. Idempotent.
    pub fn dispose(&self) {
        if !self.shared.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        self.poller.stop();
        let _delivering = self.shared.delivery.lock();
        self.shared.state.lock().subscribers.clear();
        debug!(key = %self.key, "session disposed");
    }

    /// Disposes the session and waits for in-flight refreshes to finish.
    pub async fn shutdown(&self) {
        self.dispose();
        self.poller.shutdown().await;
        let initial_load = self.initial_load.lock().take();
        if let Some(handle) = initial_load {
            let _ = handle.await;
        }
    }

    fn ensure_alive(&self) -> SyncResult<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(SyncError::Disposed)
        }
    }
}

impl<F: Fetcher + 'static, S: CacheStore + 'static> Drop for Session<F, S> {
    fn drop(&mut self) {
        self.dispose();
    }
}
