//! HTTP fetcher implementation.
//!
//! This module maps the remote REST contract onto [`Fetcher`]:
//!
//! ```text
//! GET <base>/collections/{id}/items?limit=&order=&encoding=[&timestamp=gt:<cursor>]
//! -> { "items": [...], "links": { "next": "<link>" | null } }
//! ```
//!
//! Pages that walk toward older entries are always requested newest first,
//! since an unbounded ascending query starts at the oldest entry. Such pages
//! are reversed for ascending keys before they reach the engine.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so tests can
//! route requests to an in-process server.

use crate::cache::CollectionKey;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{ContinuationToken, FetchedPage, Fetcher};
use async_trait::async_trait;
use logsync_protocol::{ConsensusTimestamp, ErrorBody, MessagesPage, Order};
use parking_lot::RwLock;
use std::time::Duration;
use url::Url;

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET request. `Err` means no response was received at all.
    async fn get(&self, url: &str) -> Result<HttpResponse, String>;

    /// Checks if the client is usable.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// [`Fetcher`] speaking the remote REST contract.
pub struct HttpFetcher<C: HttpClient> {
    /// Base URL of the remote API (e.g., "https://mirror.example.com/api/v1").
    base_url: Url,
    /// HTTP client implementation.
    client: C,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl HttpFetcher<ReqwestClient> {
    /// Creates a reqwest-backed fetcher from a sync configuration.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let client = ReqwestClient::new(config.request_timeout)?;
        Self::new(&config.base_url, client)
    }
}

impl<C: HttpClient> HttpFetcher<C> {
    /// Creates a new HTTP fetcher.
    pub fn new(base_url: &str, client: C) -> SyncResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| SyncError::Config(format!("invalid base url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "base url '{base_url}' cannot carry a path"
            )));
        }
        // Relative `next` links resolve against a directory-style base.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            client,
            last_error: RwLock::new(None),
        })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Builds the items URL for a key, optionally filtered to entries newer
    /// than `since`.
    ///
    /// Without `since` the page is requested in descending order whatever
    /// the key's order, so it holds the newest entries and links to older ones.
    pub fn items_url(
        &self,
        key: &CollectionKey,
        since: Option<ConsensusTimestamp>,
    ) -> SyncResult<Url> {
        let order = if since.is_some() { key.order } else { Order::Desc };
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Config("base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["collections", key.collection_id.as_str(), "items"]);

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("limit", &key.limit.to_string())
                .append_pair("order", order.as_str())
                .append_pair("encoding", key.encoding.as_str());
            if let Some(ts) = since {
                query.append_pair("timestamp", &format!("gt:{ts}"));
            }
        }

        Ok(url)
    }

    /// Resolves a continuation token, which may be absolute or relative.
    pub fn resolve_token(&self, token: &ContinuationToken) -> SyncResult<Url> {
        self.base_url
            .join(token.as_str())
            .map_err(|e| SyncError::transient(format!("invalid next link '{token}': {e}")))
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }

    async fn get_page(&self, key: &CollectionKey, url: Url) -> SyncResult<FetchedPage> {
        if !self.client.is_healthy() {
            return Err(SyncError::transient("http client is not healthy"));
        }

        tracing::trace!(%url, "GET");
        let response = self.client.get(url.as_str()).await.map_err(|e| {
            self.set_error(&e);
            SyncError::transient(e)
        })?;

        let result = map_response(key, response);
        match &result {
            Ok(_) => self.clear_error(),
            Err(e) => self.set_error(&e.to_string()),
        }
        let mut page = result?;
        if requested_order(&url).is_some_and(|order| order != key.order) {
            page.messages.reverse();
        }
        Ok(page)
    }
}

/// Reads the `order` parameter of a request URL.
fn requested_order(url: &Url) -> Option<Order> {
    url.query_pairs()
        .find(|(name, _)| name == "order")
        .and_then(|(_, value)| value.parse().ok())
}

/// Maps an HTTP response onto a page or an error.
fn map_response(key: &CollectionKey, response: HttpResponse) -> SyncResult<FetchedPage> {
    match response.status {
        200..=299 => {
            let page = MessagesPage::from_json(&response.body)?;
            let next = page.next_link().map(ContinuationToken::new);
            Ok(FetchedPage::new(page.items, next))
        }
        404 => Err(SyncError::NotFound(key.collection_id.clone())),
        // Rate limiting clears up on its own.
        429 => Err(SyncError::transient("HTTP 429 too many requests")),
        400..=499 => match ErrorBody::from_json(&response.body) {
            Ok(body) => Err(SyncError::InvalidRequest(body.detail())),
            Err(_) => Err(SyncError::transient(format!("HTTP {}", response.status))),
        },
        status => Err(SyncError::transient(format!("HTTP {status}"))),
    }
}

#[async_trait]
impl<C: HttpClient> Fetcher for HttpFetcher<C> {
    async fn fetch_latest(&self, key: &CollectionKey) -> SyncResult<FetchedPage> {
        let url = self.items_url(key, None)?;
        self.get_page(key, url).await
    }

    async fn fetch_since(
        &self,
        key: &CollectionKey,
        frontier: ConsensusTimestamp,
    ) -> SyncResult<FetchedPage> {
        let url = self.items_url(key, Some(frontier))?;
        self.get_page(key, url).await
    }

    async fn fetch_by_token(
        &self,
        key: &CollectionKey,
        token: &ContinuationToken,
    ) -> SyncResult<FetchedPage> {
        let url = self.resolve_token(token)?;
        self.get_page(key, url).await
    }
}

/// [`HttpClient`] backed by reqwest.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client whose every request resolves within `timeout`.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a GET for `path_and_query` (e.g. `/collections/x/items?limit=2`).
    fn handle_get(&self, path_and_query: &str) -> HttpResponse;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn get(&self, url: &str) -> Result<HttpResponse, String> {
        let parsed = Url::parse(url).map_err(|e| e.to_string())?;
        let path = &parsed[url::Position::BeforePath..];
        Ok(self.server.handle_get(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsync_protocol::{Encoding, Message, Order};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestClient {
        response: Mutex<Option<Result<HttpResponse, String>>>,
        requested: Mutex<Vec<String>>,
        healthy: AtomicBool,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: Mutex::new(None),
                requested: Mutex::new(Vec::new()),
                healthy: AtomicBool::new(true),
            }
        }

        fn set_response(&self, resp: Result<HttpResponse, String>) {
            *self.response.lock() = Some(resp);
        }

        fn last_url(&self) -> String {
            self.requested.lock().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl HttpClient for TestClient {
        async fn get(&self, url: &str) -> Result<HttpResponse, String> {
            self.requested.lock().push(url.to_string());
            self.response
                .lock()
                .clone()
                .unwrap_or_else(|| Err("No response set".into()))
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn key() -> CollectionKey {
        CollectionKey::new("topic-7", 2, Order::Desc, Encoding::Base64)
    }

    fn fetcher() -> HttpFetcher<TestClient> {
        HttpFetcher::new("https://mirror.example.com/api/v1", TestClient::new()).unwrap()
    }

    fn page_body(next: Option<&str>) -> Vec<u8> {
        let items = vec![
            Message::new(ConsensusTimestamp::from_seconds(100), 5, "0.0.1", "YQ=="),
            Message::new(ConsensusTimestamp::from_seconds(90), 4, "0.0.1", "Yg=="),
        ];
        MessagesPage::new(items, next.map(str::to_string))
            .to_json()
            .unwrap()
    }

    #[test]
    fn latest_url_shape() {
        let url = fetcher().items_url(&key(), None).unwrap();
        assert_eq!(
            url.as_str(),
            "https://mirror.example.com/api/v1/collections/topic-7/items?limit=2&order=desc&encoding=base64"
        );
    }

    #[test]
    fn ascending_first_page_is_requested_newest_first() {
        let asc = CollectionKey::new("topic-7", 2, Order::Asc, Encoding::Base64);
        let fetcher = fetcher();
        let latest = fetcher.items_url(&asc, None).unwrap();
        assert_eq!(requested_order(&latest), Some(Order::Desc));

        let since = fetcher
            .items_url(&asc, Some(ConsensusTimestamp::from_seconds(100)))
            .unwrap();
        assert_eq!(requested_order(&since), Some(Order::Asc));
    }

    #[test]
    fn since_url_filters_newer_than_frontier() {
        let asc = CollectionKey::new("topic-7", 2, Order::Asc, Encoding::Base64);
        let url = fetcher()
            .items_url(&asc, Some(ConsensusTimestamp::from_seconds(100)))
            .unwrap();
        let timestamp = url
            .query_pairs()
            .find(|(k, _)| k == "timestamp")
            .map(|(_, v)| v.into_owned());
        assert_eq!(timestamp.as_deref(), Some("gt:100.000000000"));
    }

    #[test]
    fn tokens_resolve_relative_and_absolute() {
        let fetcher = fetcher();
        let relative = ContinuationToken::new("/api/v1/collections/topic-7/items?timestamp=lt:90");
        assert_eq!(
            fetcher.resolve_token(&relative).unwrap().as_str(),
            "https://mirror.example.com/api/v1/collections/topic-7/items?timestamp=lt:90"
        );

        let absolute = ContinuationToken::new("https://other.example.com/page/2");
        assert_eq!(
            fetcher.resolve_token(&absolute).unwrap().as_str(),
            "https://other.example.com/page/2"
        );
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let result = HttpFetcher::new("not a url", TestClient::new());
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn fetch_latest_parses_page() {
        let fetcher = fetcher();
        fetcher
            .client()
            .set_response(Ok(HttpResponse::new(200, page_body(Some("/next")))));

        let page = fetcher.fetch_latest(&key()).await.unwrap();
        assert_eq!(page.messages.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.continuation_token, Some(ContinuationToken::new("/next")));
        assert!(fetcher.last_error().is_none());
    }

    #[tokio::test]
    async fn fetch_by_token_requests_resolved_link() {
        let fetcher = fetcher();
        fetcher
            .client()
            .set_response(Ok(HttpResponse::new(200, page_body(None))));

        let token = ContinuationToken::new("/api/v1/collections/topic-7/items?timestamp=lt:90");
        let page = fetcher.fetch_by_token(&key(), &token).await.unwrap();
        assert!(!page.has_more);
        assert!(fetcher.client().last_url().ends_with("timestamp=lt:90"));
    }

    #[tokio::test]
    async fn descending_pages_are_flipped_for_ascending_keys() {
        let asc = CollectionKey::new("topic-7", 2, Order::Asc, Encoding::Base64);
        let fetcher = fetcher();
        fetcher
            .client()
            .set_response(Ok(HttpResponse::new(200, page_body(Some("/older")))));

        let page = fetcher.fetch_latest(&asc).await.unwrap();
        let seconds: Vec<u64> = page
            .messages
            .iter()
            .map(|m| m.consensus_timestamp.seconds)
            .collect();
        assert_eq!(seconds, vec![90, 100]);

        let token = ContinuationToken::new("/api/v1/collections/topic-7/items?order=desc&timestamp=lt:90");
        let older = fetcher.fetch_by_token(&asc, &token).await.unwrap();
        assert_eq!(older.messages[0].consensus_timestamp.seconds, 90);

        let token = ContinuationToken::new("/api/v1/collections/topic-7/items?order=asc&timestamp=gt:90");
        let newer = fetcher.fetch_by_token(&asc, &token).await.unwrap();
        assert_eq!(newer.messages[0].consensus_timestamp.seconds, 100);
    }

    #[tokio::test]
    async fn status_mapping() {
        let fetcher = fetcher();

        fetcher
            .client()
            .set_response(Ok(HttpResponse::new(404, Vec::new())));
        assert_eq!(
            fetcher.fetch_latest(&key()).await,
            Err(SyncError::NotFound("topic-7".into()))
        );

        let body = ErrorBody::new("Invalid parameter: limit").to_json().unwrap();
        fetcher
            .client()
            .set_response(Ok(HttpResponse::new(400, body)));
        assert_eq!(
            fetcher.fetch_latest(&key()).await,
            Err(SyncError::InvalidRequest("Invalid parameter: limit".into()))
        );

        fetcher
            .client()
            .set_response(Ok(HttpResponse::new(400, b"plain text".to_vec())));
        assert!(fetcher.fetch_latest(&key()).await.unwrap_err().is_retryable());

        fetcher
            .client()
            .set_response(Ok(HttpResponse::new(503, Vec::new())));
        assert!(fetcher.fetch_latest(&key()).await.unwrap_err().is_retryable());

        fetcher
            .client()
            .set_response(Ok(HttpResponse::new(200, b"{not json".to_vec())));
        assert!(fetcher.fetch_latest(&key()).await.unwrap_err().is_retryable());
        assert!(fetcher.last_error().is_some());
    }

    #[tokio::test]
    async fn network_failure_is_transient() {
        let fetcher = fetcher();
        fetcher
            .client()
            .set_response(Err("connection refused".into()));
        let err = fetcher.fetch_latest(&key()).await.unwrap_err();
        assert_eq!(err, SyncError::transient("connection refused"));
        assert_eq!(fetcher.last_error().as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn unhealthy_client_is_transient() {
        let fetcher = fetcher();
        fetcher.client().healthy.store(false, Ordering::SeqCst);
        assert!(fetcher.fetch_latest(&key()).await.unwrap_err().is_retryable());
        assert!(fetcher.client().requested.lock().is_empty());
    }

    struct EchoServer;

    impl LoopbackServer for EchoServer {
        fn handle_get(&self, path_and_query: &str) -> HttpResponse {
            HttpResponse::new(200, path_and_query.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn loopback_client_strips_origin() {
        let client = LoopbackClient::new(EchoServer);
        let response = client
            .get("http://mirror.local/collections/a/items?limit=1")
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, b"/collections/a/items?limit=1");
    }
}
