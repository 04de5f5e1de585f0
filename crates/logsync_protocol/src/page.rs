//! Response bodies.

use crate::error::ProtocolResult;
use crate::message::Message;
use serde::{Deserialize, Serialize};

/// Pagination links of a page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Links {
    /// Opaque link to the next page, absent on the last page.
    #[serde(default)]
    pub next: Option<String>,
}

/// One page of messages: `{ "items": [...], "links": { "next": ... } }`.
///
/// The mirror-node spelling `"messages"` is accepted for `items`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessagesPage {
    /// Messages in the requested order.
    #[serde(alias = "messages", default)]
    pub items: Vec<Message>,
    /// Pagination links.
    #[serde(default)]
    pub links: Links,
}

impl MessagesPage {
    /// Creates a page.
    pub fn new(items: Vec<Message>, next: Option<String>) -> Self {
        Self {
            items,
            links: Links { next },
        }
    }

    /// Returns the next-page link, treating an empty string as absent.
    pub fn next_link(&self) -> Option<&str> {
        self.links.next.as_deref().filter(|s| !s.is_empty())
    }

    /// Decodes a page from a JSON body.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes the page as JSON.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// One entry of a structured error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Human-readable detail.
    pub message: String,
}

/// Status section of a structured error body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorStatus {
    /// Error details.
    #[serde(default)]
    pub messages: Vec<ErrorMessage>,
}

/// Structured error body: `{ "_status": { "messages": [{ "message": ... }] } }`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error status.
    #[serde(rename = "_status")]
    pub status: ErrorStatus,
}

impl ErrorBody {
    /// Creates a body with a single message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: ErrorStatus {
                messages: vec![ErrorMessage {
                    message: message.into(),
                }],
            },
        }
    }

    /// Joins all messages into one detail string.
    pub fn detail(&self) -> String {
        self.status
            .messages
            .iter()
            .map(|m| m.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Decodes an error body from JSON.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes the body as JSON.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::ConsensusTimestamp;

    #[test]
    fn decode_page_with_next() {
        let body = br#"{
            "items": [
                {"consensus_timestamp":"100","sequence_number":5,"payer_account_id":"0.0.1","message":"YQ=="},
                {"consensus_timestamp":"90","sequence_number":4,"payer_account_id":"0.0.1","message":"Yg=="}
            ],
            "links": {"next": "/collections/topic-7/items?limit=2&order=desc&timestamp=lt:90.000000000"}
        }"#;
        let page = MessagesPage::from_json(body).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].consensus_timestamp, ConsensusTimestamp::from_seconds(100));
        assert!(page.next_link().unwrap().contains("lt:90"));
    }

    #[test]
    fn mirror_node_spelling_is_accepted() {
        let body = br#"{"messages": [], "links": {"next": null}}"#;
        let page = MessagesPage::from_json(body).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_link(), None);
    }

    #[test]
    fn empty_next_is_absent() {
        let page = MessagesPage::new(vec![], Some(String::new()));
        assert_eq!(page.next_link(), None);
    }

    #[test]
    fn malformed_page_is_an_error() {
        assert!(MessagesPage::from_json(b"{\"items\": 3}").is_err());
        assert!(MessagesPage::from_json(b"<html>").is_err());
    }

    #[test]
    fn error_body_detail() {
        let body = br#"{"_status":{"messages":[{"message":"Invalid parameter: limit"},{"message":"Invalid parameter: order"}]}}"#;
        let err = ErrorBody::from_json(body).unwrap();
        assert_eq!(err.detail(), "Invalid parameter: limit; Invalid parameter: order");

        let encoded = ErrorBody::new("Not found").to_json().unwrap();
        assert_eq!(ErrorBody::from_json(&encoded).unwrap().detail(), "Not found");
    }
}
