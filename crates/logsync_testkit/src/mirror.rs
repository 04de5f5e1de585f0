//! In-memory mirror of the remote log API.
//!
//! [`MirrorLog`] serves `GET .../collections/{id}/items` exactly like the
//! remote does: filtered by `timestamp=gt:/gte:/lt:/lte:` bounds, paged by
//! `limit`, ordered by `order`, with a relative `next` link when more
//! entries exist in the paging direction. It is used by integration tests
//! through a loopback client, so no sockets are involved.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use logsync_protocol::{
    ConsensusTimestamp, Encoding, ErrorBody, Message, MessagesPage, Order,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};

/// Largest page the mirror serves.
pub const MIRROR_MAX_LIMIT: u32 = 100;

/// Page size used when a request carries no `limit`.
pub const MIRROR_DEFAULT_LIMIT: u32 = 25;

/// First timestamp handed out by [`MirrorLog::publish`], in seconds.
const GENESIS_SECONDS: u64 = 1_700_000_000;

/// A response produced by the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: Vec<u8>,
}

impl MirrorResponse {
    fn json(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        let body = ErrorBody::new(message).to_json().unwrap_or_default();
        Self { status, body }
    }
}

/// Timestamp bounds parsed from `timestamp=` parameters.
#[derive(Debug, Clone, Copy, Default)]
struct Window {
    after: Option<(ConsensusTimestamp, bool)>,
    before: Option<(ConsensusTimestamp, bool)>,
}

impl Window {
    fn contains(&self, ts: ConsensusTimestamp) -> bool {
        let above = match self.after {
            Some((bound, inclusive)) => ts > bound || (inclusive && ts == bound),
            None => true,
        };
        let below = match self.before {
            Some((bound, inclusive)) => ts < bound || (inclusive && ts == bound),
            None => true,
        };
        above && below
    }

    fn query_params(&self) -> Vec<String> {
        let mut params = Vec::new();
        if let Some((ts, inclusive)) = self.after {
            params.push(format!("timestamp={}:{ts}", if inclusive { "gte" } else { "gt" }));
        }
        if let Some((ts, inclusive)) = self.before {
            params.push(format!("timestamp={}:{ts}", if inclusive { "lte" } else { "lt" }));
        }
        params
    }
}

/// A parsed items request.
#[derive(Debug, Clone)]
struct ItemsQuery {
    collection: String,
    limit: u32,
    order: Order,
    encoding: Encoding,
    window: Window,
}

/// An in-memory append-only log with one message list per collection.
#[derive(Default)]
pub struct MirrorLog {
    /// Messages per collection, ascending by `(timestamp, sequence)`.
    collections: RwLock<HashMap<String, Vec<Message>>>,
    requests: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<u16>>,
}

impl MirrorLog {
    /// Creates an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collection if it does not exist yet.
    pub fn create_collection(&self, collection: &str) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default();
    }

    /// Appends a message with the next timestamp and sequence number.
    ///
    /// The payload is stored base64-encoded, the way the remote stores it.
    pub fn publish(&self, collection: &str, payload: &[u8]) -> Message {
        let mut collections = self.collections.write();
        let messages = collections.entry(collection.to_string()).or_default();

        let (timestamp, sequence) = match messages.last() {
            Some(last) => (
                ConsensusTimestamp::from_seconds(last.consensus_timestamp.seconds + 1),
                last.sequence_number + 1,
            ),
            None => (ConsensusTimestamp::from_seconds(GENESIS_SECONDS), 1),
        };
        let message = Message::new(timestamp, sequence, "0.0.2", STANDARD.encode(payload))
            .with_topic_id(collection);
        messages.push(message.clone());
        message
    }

    /// Inserts a prepared message, keeping the collection sorted.
    pub fn insert(&self, collection: &str, message: Message) {
        let mut collections = self.collections.write();
        let messages = collections.entry(collection.to_string()).or_default();
        let id = message.id();
        if messages.iter().any(|m| m.id() == id) {
            return;
        }
        let at = messages.partition_point(|m| m.id() < id);
        messages.insert(at, message);
    }

    /// Returns the number of messages in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Returns every message of a collection in ascending order.
    pub fn messages(&self, collection: &str) -> Vec<Message> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes the next request fail with `status`.
    pub fn fail_next(&self, status: u16) {
        self.failures.lock().push_back(status);
    }

    /// Returns the path and query of every request served so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests served so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Serves a GET for `path_and_query`.
    ///
    /// Any path prefix before `/collections/` is ignored, so the mirror can
    /// sit behind a base URL such as `http://host/api/v1/`.
    pub fn handle_get(&self, path_and_query: &str) -> MirrorResponse {
        self.requests.lock().push(path_and_query.to_string());

        if let Some(status) = self.failures.lock().pop_front() {
            return MirrorResponse::error(status, "injected failure");
        }

        let query = match parse_request(path_and_query) {
            Ok(query) => query,
            Err(response) => return response,
        };

        let collections = self.collections.read();
        let Some(messages) = collections.get(&query.collection) else {
            return MirrorResponse::error(404, "Not found");
        };

        let page = serve(messages, &query);
        match page.to_json() {
            Ok(body) => MirrorResponse::json(200, body),
            Err(e) => MirrorResponse::error(500, e.to_string()),
        }
    }
}

fn parse_request(path_and_query: &str) -> Result<ItemsQuery, MirrorResponse> {
    let (path, query) = path_and_query
        .split_once('?')
        .unwrap_or((path_and_query, ""));

    let collection = path
        .find("/collections/")
        .map(|at| &path[at + "/collections/".len()..])
        .and_then(|rest| rest.strip_suffix("/items"))
        .filter(|id| !id.is_empty() && !id.contains('/'))
        .ok_or_else(|| MirrorResponse::error(404, "Not found"))?;

    let mut items = ItemsQuery {
        collection: collection.to_string(),
        limit: MIRROR_DEFAULT_LIMIT,
        order: Order::Desc,
        encoding: Encoding::Base64,
        window: Window::default(),
    };

    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let invalid = || MirrorResponse::error(400, format!("Invalid parameter: {name}"));
        match name.as_ref() {
            "limit" => {
                items.limit = value
                    .parse()
                    .ok()
                    .filter(|l| (1..=MIRROR_MAX_LIMIT).contains(l))
                    .ok_or_else(invalid)?;
            }
            "order" => items.order = value.parse().map_err(|_| invalid())?,
            "encoding" => items.encoding = value.parse().map_err(|_| invalid())?,
            "timestamp" => {
                let (op, raw) = value.split_once(':').ok_or_else(invalid)?;
                let ts: ConsensusTimestamp = raw.parse().map_err(|_| invalid())?;
                match op {
                    "gt" => items.window.after = Some((ts, false)),
                    "gte" => items.window.after = Some((ts, true)),
                    "lt" => items.window.before = Some((ts, false)),
                    "lte" => items.window.before = Some((ts, true)),
                    _ => return Err(invalid()),
                }
            }
            _ => return Err(invalid()),
        }
    }

    Ok(items)
}

/// Selects one page and builds its `next` link.
///
/// Descending pages walk from the newest entry down, ascending pages from
/// the oldest entry (or the lower bound) up.
fn serve(messages: &[Message], query: &ItemsQuery) -> MessagesPage {
    let limit = query.limit as usize;
    let matching: Vec<&Message> = messages
        .iter()
        .filter(|m| query.window.contains(m.consensus_timestamp))
        .collect();
    let more = matching.len() > limit;

    let (page, next_window): (Vec<&Message>, Option<Window>) = match query.order {
        Order::Desc => {
            let page: Vec<&Message> = matching.iter().rev().take(limit).copied().collect();
            let next = page.last().map(|last| Window {
                before: Some((last.consensus_timestamp, false)),
                ..query.window
            });
            (page, next)
        }
        Order::Asc => {
            let page: Vec<&Message> = matching.iter().take(limit).copied().collect();
            let next = page.last().map(|last| Window {
                after: Some((last.consensus_timestamp, false)),
                ..query.window
            });
            (page, next)
        }
    };

    let next = match next_window {
        Some(window) if more => Some(next_link(query, &window)),
        _ => None,
    };

    let items = page
        .into_iter()
        .map(|m| encode_for(m, query.encoding))
        .collect();
    MessagesPage::new(items, next)
}

fn next_link(query: &ItemsQuery, window: &Window) -> String {
    let mut link = format!(
        "collections/{}/items?limit={}&order={}&encoding={}",
        query.collection, query.limit, query.order, query.encoding
    );
    for param in window.query_params() {
        link.push('&');
        link.push_str(&param);
    }
    link
}

fn encode_for(message: &Message, encoding: Encoding) -> Message {
    let mut message = message.clone();
    if encoding == Encoding::Utf8 {
        if let Ok(bytes) = message.decode_payload(Encoding::Base64) {
            message.message = String::from_utf8_lossy(&bytes).into_owned();
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(seconds: u64) -> ConsensusTimestamp {
        ConsensusTimestamp::from_seconds(seconds)
    }

    fn mirror_with(seconds: &[u64]) -> MirrorLog {
        let mirror = MirrorLog::new();
        for (i, s) in seconds.iter().enumerate() {
            mirror.insert("t", Message::new(ts(*s), i as u64 + 1, "0.0.2", ""));
        }
        mirror
    }

    fn page(mirror: &MirrorLog, path: &str) -> MessagesPage {
        let response = mirror.handle_get(path);
        assert_eq!(response.status, 200, "{}", String::from_utf8_lossy(&response.body));
        MessagesPage::from_json(&response.body).unwrap()
    }

    fn seconds(page: &MessagesPage) -> Vec<u64> {
        page.items.iter().map(|m| m.consensus_timestamp.seconds).collect()
    }

    #[test]
    fn desc_pages_walk_down() {
        let mirror = mirror_with(&[10, 20, 30, 40, 50]);
        let first = page(&mirror, "/collections/t/items?limit=2&order=desc");
        assert_eq!(seconds(&first), vec![50, 40]);

        let link = first.next_link().unwrap().to_string();
        assert!(link.contains("timestamp=lt:40.000000000"));
        let second = page(&mirror, &format!("/{link}"));
        assert_eq!(seconds(&second), vec![30, 20]);

        let third = page(&mirror, &format!("/{}", second.next_link().unwrap()));
        assert_eq!(seconds(&third), vec![10]);
        assert!(third.next_link().is_none());
    }

    #[test]
    fn gt_filter_returns_newer_only() {
        let mirror = mirror_with(&[10, 20, 30]);
        let delta = page(&mirror, "/collections/t/items?limit=5&order=desc&timestamp=gt:20");
        assert_eq!(seconds(&delta), vec![30]);
        assert!(delta.next_link().is_none());
    }

    #[test]
    fn asc_with_lower_bound_walks_up() {
        let mirror = mirror_with(&[10, 20, 30, 40]);
        let first = page(&mirror, "/collections/t/items?limit=2&order=asc&timestamp=gt:10");
        assert_eq!(seconds(&first), vec![20, 30]);
        let second = page(&mirror, &format!("/{}", first.next_link().unwrap()));
        assert_eq!(seconds(&second), vec![40]);
    }

    #[test]
    fn asc_without_bound_starts_at_oldest() {
        let mirror = mirror_with(&[10, 20, 30, 40]);
        let first = page(&mirror, "/collections/t/items?limit=2&order=asc");
        assert_eq!(seconds(&first), vec![10, 20]);
        let newer = page(&mirror, &format!("/{}", first.next_link().unwrap()));
        assert_eq!(seconds(&newer), vec![30, 40]);
        assert!(newer.next_link().is_none());
    }

    #[test]
    fn prefix_before_collections_is_ignored() {
        let mirror = mirror_with(&[10]);
        let page = page(&mirror, "/api/v1/collections/t/items?limit=1");
        assert_eq!(seconds(&page), vec![10]);
    }

    #[test]
    fn unknown_collection_is_404() {
        let mirror = MirrorLog::new();
        let response = mirror.handle_get("/collections/nope/items?limit=1");
        assert_eq!(response.status, 404);
    }

    #[test]
    fn bad_parameters_are_400_with_body() {
        let mirror = mirror_with(&[10]);
        for path in [
            "/collections/t/items?limit=0",
            "/collections/t/items?limit=101",
            "/collections/t/items?order=sideways",
            "/collections/t/items?timestamp=gt:abc",
            "/collections/t/items?timestamp=eq:10",
        ] {
            let response = mirror.handle_get(path);
            assert_eq!(response.status, 400, "{path}");
            let body = ErrorBody::from_json(&response.body).unwrap();
            assert!(body.detail().starts_with("Invalid parameter"));
        }
    }

    #[test]
    fn injected_failure_applies_once() {
        let mirror = mirror_with(&[10]);
        mirror.fail_next(503);
        assert_eq!(mirror.handle_get("/collections/t/items").status, 503);
        assert_eq!(mirror.handle_get("/collections/t/items").status, 200);
        assert_eq!(mirror.request_count(), 2);
    }

    #[test]
    fn publish_assigns_increasing_ids() {
        let mirror = MirrorLog::new();
        let a = mirror.publish("t", b"hello");
        let b = mirror.publish("t", b"world");
        assert!(b.consensus_timestamp > a.consensus_timestamp);
        assert_eq!(b.sequence_number, a.sequence_number + 1);
        assert_eq!(a.decode_payload(Encoding::Base64).unwrap(), b"hello");
    }

    #[test]
    fn utf8_encoding_decodes_payload() {
        let mirror = MirrorLog::new();
        mirror.publish("t", b"hello");
        let page = page(&mirror, "/collections/t/items?encoding=utf-8");
        assert_eq!(page.items[0].message, "hello");
    }

    #[test]
    fn insert_ignores_duplicates() {
        let mirror = mirror_with(&[10, 20]);
        mirror.insert("t", Message::new(ts(10), 1, "0.0.2", ""));
        assert_eq!(mirror.len("t"), 2);
    }
}
