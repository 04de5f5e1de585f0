//! Configuration for the sync engine.

use crate::cache::CollectionKey;
use crate::error::{SyncError, SyncResult};
use logsync_protocol::{Encoding, Order};
use std::time::Duration;

/// Largest page size the remote API accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote API.
    pub base_url: String,
    /// Page size.
    pub limit: u32,
    /// Order of pages and of the cached list.
    pub order: Order,
    /// Payload transfer encoding.
    pub encoding: Encoding,
    /// Time between smart-refresh ticks.
    pub poll_interval: Duration,
    /// How long a cache entry is trusted without a network call.
    pub cache_timeout: Duration,
    /// Upper bound for a single remote call.
    pub request_timeout: Duration,
    /// Maximum `next` links followed while catching up on a delta.
    pub max_catch_up_pages: u32,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            limit: 25,
            order: Order::Desc,
            encoding: Encoding::Base64,
            poll_interval: Duration::from_secs(10),
            cache_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_catch_up_pages: 10,
        }
    }

    /// Sets the page size.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the order.
    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Sets the payload encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the cache trust window.
    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets how many delta pages are followed before a full reload.
    pub fn with_max_catch_up_pages(mut self, pages: u32) -> Self {
        self.max_catch_up_pages = pages;
        self
    }

    /// Builds the cache key for a collection under this configuration.
    pub fn key_for(&self, collection_id: impl Into<String>) -> CollectionKey {
        CollectionKey::new(collection_id, self.limit, self.order, self.encoding)
    }

    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.limit == 0 || self.limit > MAX_PAGE_SIZE {
            return Err(SyncError::Config(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.limit
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(SyncError::Config("poll interval must be non-zero".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(SyncError::Config("request timeout must be non-zero".into()));
        }
        if self.max_catch_up_pages == 0 {
            return Err(SyncError::Config(
                "max catch-up pages must be at least 1".into(),
            ));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| SyncError::Config(format!("invalid base url '{}': {e}", self.base_url)))?;
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("http://localhost:5551")
    }
}
