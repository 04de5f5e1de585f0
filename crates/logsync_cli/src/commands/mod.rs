//! CLI command implementations.

pub mod fetch;
pub mod settings;
pub mod watch;
