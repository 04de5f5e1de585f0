//! # logsync testkit
//!
//! Test utilities for logsync.
//!
//! This crate provides:
//! - An in-memory mirror of the remote log API
//! - Message fixtures and seeded scenarios
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use logsync_testkit::prelude::*;
//!
//! #[test]
//! fn serves_first_page() {
//!     let mirror = scenarios::topic_7();
//!     let response = mirror.handle_get("/collections/topic-7/items?limit=2");
//!     assert_eq!(response.status, 200);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mirror;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::mirror::*;
}

pub use fixtures::*;
pub use generators::*;
pub use mirror::*;
