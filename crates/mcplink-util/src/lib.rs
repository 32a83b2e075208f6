//! Shared utilities for mcplink.
//!
//! - Prefixed ULID session identifiers
//! - Tracing subscriber setup
//! - Platform data directories
//! - Wall-clock helpers for expiry bookkeeping

pub mod id;
pub mod log;
pub mod paths;
pub mod time;

pub use id::{IdPrefix, Identifier};
pub use log::{LogConfig, LogLevel};
pub use time::{now_ms, now_secs};
