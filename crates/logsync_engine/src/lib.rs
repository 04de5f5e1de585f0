//! # logsync engine
//!
//! Client-side incremental sync and caching for paginated, append-only
//! remote message logs.
//!
//! This crate provides:
//! - A per-key cache store with freshness tracking
//! - A fetcher abstraction over the remote log (HTTP, loopback, mock)
//! - Order-preserving, deduplicating merge of fetched pages
//! - The sync state machine (idle → refreshing / loading more → idle)
//! - A cancellable poller and a consumer-facing session
//!
//! ## Refresh model
//!
//! Each refresh for a key picks the cheapest correct action:
//! 1. Serve the cached entry if it is younger than the cache timeout
//! 2. Fetch only messages newer than the cached frontier and merge them
//! 3. Fall back to a full first page when there is nothing usable cached
//!
//! Older pages are pulled on demand with `load_more` and never affect the
//! freshness of the newer end.
//!
//! ## Key Invariants
//!
//! - Cached messages are unique by `(timestamp, sequence)` and ordered
//! - Refresh and load-more for one key never run concurrently
//! - A failed fetch never clears cached messages
//! - A disposed session never receives another view

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod cache;
mod clock;
mod config;
mod error;
mod http;
pub mod merge;
mod poller;
mod session;
mod state;
mod transport;

pub use cache::{newest_timestamp, CacheEntry, CacheStore, CollectionKey, MemoryCacheStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SyncConfig, MAX_PAGE_SIZE};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use http::{
    HttpClient, HttpFetcher, HttpResponse, LoopbackClient, LoopbackServer, ReqwestClient,
};
pub use poller::{
    IntervalTicker, ManualScheduler, ManualTicker, NoopObserver, PollObserver, PollStats, Poller,
    Scheduler, Ticker, TokioScheduler,
};
pub use session::{Session, SessionView, SubscriptionId};
pub use state::{SyncEngine, SyncOutcome, SyncPhase, SyncStats};
pub use transport::{ContinuationToken, FetchCall, FetchedPage, Fetcher, MockFetcher};

pub use logsync_protocol::{ConsensusTimestamp, Encoding, Message, Order};

/// Version of the engine crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
