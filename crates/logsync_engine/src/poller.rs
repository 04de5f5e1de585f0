//! Periodic refresh of one collection key.
//!
//! A [`Poller`] runs a background task that calls
//! [`SyncEngine::refresh`] on every tick of a [`Ticker`]. Ticks that land
//! while the key is busy are skipped, never queued.

use crate::cache::{CacheStore, CollectionKey};
use crate::state::{SyncEngine, SyncOutcome};
use crate::transport::Fetcher;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// A source of poll ticks.
#[async_trait]
pub trait Ticker: Send + 'static {
    /// Waits for the next tick.
    async fn tick(&mut self);
}

/// Creates tickers with a fixed period.
pub trait Scheduler: Send + Sync {
    /// The ticker type.
    type Ticker: Ticker;

    /// Creates a ticker that fires every `period`, first after one period.
    fn ticker(&self, period: Duration) -> Self::Ticker;
}

/// Scheduler backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

/// Ticker backed by a `tokio::time::Interval`.
pub struct IntervalTicker {
    interval: tokio::time::Interval,
}

impl Scheduler for TokioScheduler {
    type Ticker = IntervalTicker;

    fn ticker(&self, period: Duration) -> IntervalTicker {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        IntervalTicker { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// A scheduler whose tickers fire only when told to.
#[derive(Default)]
pub struct ManualScheduler {
    senders: Mutex<Vec<mpsc::UnboundedSender<()>>>,
}

/// Ticker created by [`ManualScheduler`].
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

impl ManualScheduler {
    /// Creates a scheduler with no tickers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires one tick on every live ticker and returns how many were fired.
    pub fn fire(&self) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|tx| tx.send(()).is_ok());
        senders.len()
    }
}

impl Scheduler for ManualScheduler {
    type Ticker = ManualTicker;

    fn ticker(&self, _period: Duration) -> ManualTicker {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        ManualTicker { rx }
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

/// Receives poll cycle events.
pub trait PollObserver: Send + Sync + 'static {
    /// Called before a tick starts a refresh.
    fn on_tick_start(&self) {}

    /// Called with the result of a tick's refresh.
    fn on_tick(&self, outcome: &SyncOutcome);
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PollObserver for NoopObserver {
    fn on_tick(&self, _outcome: &SyncOutcome) {}
}

/// Counters of a poller.
#[derive(Debug, Default)]
pub struct PollStats {
    ticks_run: AtomicU64,
    ticks_skipped: AtomicU64,
}

impl PollStats {
    /// Ticks that ran a refresh.
    pub fn ticks_run(&self) -> u64 {
        self.ticks_run.load(Ordering::Relaxed)
    }

    /// Ticks dropped because the key was busy.
    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped.load(Ordering::Relaxed)
    }
}

/// Handle to a background poll loop.
///
/// Stopping (or dropping) the handle prevents further ticks. A refresh
/// already in flight completes, so the cache is never left half-written.
pub struct Poller {
    key: CollectionKey,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<PollStats>,
}

impl Poller {
    /// Spawns a poll loop on the current tokio runtime.
    pub fn spawn<F, S, T, O>(
        engine: Arc<SyncEngine<F, S>>,
        key: CollectionKey,
        mut ticker: T,
        observer: Arc<O>,
    ) -> Self
    where
        F: Fetcher + 'static,
        S: CacheStore + 'static,
        T: Ticker,
        O: PollObserver + ?Sized,
    {
        let (shutdown, mut stopped) = watch::channel(false);
        let stats = Arc::new(PollStats::default());

        let task_stats = Arc::clone(&stats);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            debug!(key = %task_key, "poller started");
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {}
                }

                if engine.phase(&task_key).is_busy() {
                    trace!(key = %task_key, "tick skipped, key busy");
                    task_stats.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                observer.on_tick_start();
                let outcome = engine.refresh(&task_key, false).await;
                task_stats.ticks_run.fetch_add(1, Ordering::Relaxed);
                observer.on_tick(&outcome);
            }
            debug!(key = %task_key, "poller stopped");
        });

        Self {
            key,
            shutdown,
            handle: Mutex::new(Some(handle)),
            stats,
        }
    }

    /// Returns the polled key.
    pub fn key(&self) -> &CollectionKey {
        &self.key
    }

    /// Returns the poll counters.
    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    /// Returns true once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    /// Stops the loop. Idempotent.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stops the loop and waits for an in-flight tick to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}
