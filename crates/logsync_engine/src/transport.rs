//! Fetcher abstraction over the remote log.

use crate::cache::CollectionKey;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use logsync_protocol::{ConsensusTimestamp, Message};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Notify};

/// Opaque pointer to a further page, as handed out by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Wraps a raw token or link.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A page returned by a [`Fetcher`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchedPage {
    /// Messages in the requested order.
    pub messages: Vec<Message>,
    /// Whether a further page exists.
    pub has_more: bool,
    /// Pointer to the further page.
    pub continuation_token: Option<ContinuationToken>,
}

impl FetchedPage {
    /// Creates a page; `has_more` follows the presence of a token.
    pub fn new(messages: Vec<Message>, continuation_token: Option<ContinuationToken>) -> Self {
        Self {
            messages,
            has_more: continuation_token.is_some(),
            continuation_token,
        }
    }

    /// Creates an empty final page.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Performs the three kinds of remote reads.
///
/// Implementations must always resolve, either with a page or a
/// [`SyncError`]; a call that never completes would leave its key busy.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the initial page for `key`.
    async fn fetch_latest(&self, key: &CollectionKey) -> SyncResult<FetchedPage>;

    /// Fetches entries strictly newer than `frontier`, whatever the order.
    async fn fetch_since(
        &self,
        key: &CollectionKey,
        frontier: ConsensusTimestamp,
    ) -> SyncResult<FetchedPage>;

    /// Follows a continuation token.
    async fn fetch_by_token(
        &self,
        key: &CollectionKey,
        token: &ContinuationToken,
    ) -> SyncResult<FetchedPage>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch_latest(&self, key: &CollectionKey) -> SyncResult<FetchedPage> {
        (**self).fetch_latest(key).await
    }

    async fn fetch_since(
        &self,
        key: &CollectionKey,
        frontier: ConsensusTimestamp,
    ) -> SyncResult<FetchedPage> {
        (**self).fetch_since(key, frontier).await
    }

    async fn fetch_by_token(
        &self,
        key: &CollectionKey,
        token: &ContinuationToken,
    ) -> SyncResult<FetchedPage> {
        (**self).fetch_by_token(key, token).await
    }
}

/// A call observed by [`MockFetcher`].
#[derive(Debug, Clone, PartialEq)]
pub enum FetchCall {
    /// `fetch_latest`.
    Latest(CollectionKey),
    /// `fetch_since`.
    Since(CollectionKey, ConsensusTimestamp),
    /// `fetch_by_token`.
    ByToken(CollectionKey, ContinuationToken),
}

type Script = Mutex<VecDeque<SyncResult<FetchedPage>>>;

/// A scripted fetcher for testing.
///
/// Responses are queued per call kind and consumed in order. Calls can be
/// held open with [`MockFetcher::hold`] to test in-flight behavior.
pub struct MockFetcher {
    latest: Script,
    since: Script,
    by_token: Script,
    calls: Mutex<Vec<FetchCall>>,
    call_made: Notify,
    gate: watch::Sender<bool>,
}

impl MockFetcher {
    /// Creates a new mock fetcher with empty scripts.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            latest: Mutex::new(VecDeque::new()),
            since: Mutex::new(VecDeque::new()),
            by_token: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            call_made: Notify::new(),
            gate,
        }
    }

    /// Queues a `fetch_latest` response.
    pub fn push_latest(&self, response: SyncResult<FetchedPage>) {
        self.latest.lock().push_back(response);
    }

    /// Queues a `fetch_since` response.
    pub fn push_since(&self, response: SyncResult<FetchedPage>) {
        self.since.lock().push_back(response);
    }

    /// Queues a `fetch_by_token` response.
    pub fn push_by_token(&self, response: SyncResult<FetchedPage>) {
        self.by_token.lock().push_back(response);
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Makes subsequent calls wait until [`MockFetcher::release`].
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Lets held calls complete.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Waits until at least `count` calls have been made.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.call_made.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.call_count() >= count {
                return;
            }
            notified.await;
        }
    }

    async fn respond(&self, call: FetchCall, script: &Script) -> SyncResult<FetchedPage> {
        let what = match &call {
            FetchCall::Latest(_) => "latest",
            FetchCall::Since(..) => "since",
            FetchCall::ByToken(..) => "by-token",
        };
        self.calls.lock().push(call);
        self.call_made.notify_waiters();

        let mut gate = self.gate.subscribe();
        // A closed gate channel cannot happen while `self` is alive.
        let _ = gate.wait_for(|open| *open).await;

        script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::transient(format!("no mock {what} response queued"))))
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch_latest(&self, key: &CollectionKey) -> SyncResult<FetchedPage> {
        self.respond(FetchCall::Latest(key.clone()), &self.latest)
            .await
    }

    async fn fetch_since(
        &self,
        key: &CollectionKey,
        frontier: ConsensusTimestamp,
    ) -> SyncResult<FetchedPage> {
        self.respond(FetchCall::Since(key.clone(), frontier), &self.since)
            .await
    }

    async fn fetch_by_token(
        &self,
        key: &CollectionKey,
        token: &ContinuationToken,
    ) -> SyncResult<FetchedPage> {
        self.respond(FetchCall::ByToken(key.clone(), token.clone()), &self.by_token)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsync_protocol::{Encoding, Order};

    fn key() -> CollectionKey {
        CollectionKey::new("topic-7", 2, Order::Desc, Encoding::Base64)
    }

    #[test]
    fn page_has_more_follows_token() {
        let page = FetchedPage::new(vec![], Some(ContinuationToken::new("/next")));
        assert!(page.has_more);
        assert!(!FetchedPage::empty().has_more);
    }

    #[tokio::test]
    async fn mock_fetcher_replays_script_in_order() {
        let fetcher = MockFetcher::new();
        fetcher.push_latest(Ok(FetchedPage::empty()));
        fetcher.push_latest(Err(SyncError::NotFound("topic-7".into())));

        assert!(fetcher.fetch_latest(&key()).await.is_ok());
        assert!(matches!(
            fetcher.fetch_latest(&key()).await,
            Err(SyncError::NotFound(_))
        ));
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_fetcher_without_script_is_transient() {
        let fetcher = MockFetcher::new();
        let token = ContinuationToken::new("t");
        let err = fetcher.fetch_by_token(&key(), &token).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(fetcher.calls(), vec![FetchCall::ByToken(key(), token)]);
    }

    #[tokio::test]
    async fn mock_fetcher_hold_and_release() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.push_since(Ok(FetchedPage::empty()));
        fetcher.hold();

        let task = {
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move {
                fetcher
                    .fetch_since(&key(), ConsensusTimestamp::from_seconds(1))
                    .await
            })
        };

        fetcher.wait_for_calls(1).await;
        assert!(!task.is_finished());

        fetcher.release();
        assert!(task.await.unwrap().is_ok());
    }
}
