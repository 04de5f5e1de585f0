//! # logsync protocol
//!
//! Wire types for a paginated, append-only, timestamp-ordered remote log.
//!
//! This crate provides:
//! - `Message` for one remote log entry and its dedup identity
//! - `ConsensusTimestamp`, the ordering key assigned by the remote source
//! - `Order` and `Encoding` query parameters
//! - `MessagesPage` and `ErrorBody` response bodies (JSON)
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod message;
mod page;
mod query;
mod timestamp;

pub use error::{ProtocolError, ProtocolResult};
pub use message::{ChunkInfo, Message, MessageId};
pub use page::{ErrorBody, ErrorMessage, ErrorStatus, Links, MessagesPage};
pub use query::{Encoding, Order};
pub use timestamp::ConsensusTimestamp;
