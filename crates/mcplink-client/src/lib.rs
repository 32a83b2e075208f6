//! Client runtime for mcplink.
//!
//! This crate tracks which servers are usable from the caller's side:
//!
//! - `ConnectionManager`: drives connection attempts and publishes phase events
//! - `ConnectionStore`: persisted, time-bounded mirror of connection outcomes
//! - `ToolExecutor`: tool calls with a single reconnect-and-retry
//! - `SessionGateway`: how the runtime reaches the session service

pub mod backend;
pub mod error;
pub mod events;
pub mod executor;
pub mod gateway;
pub mod manager;
pub mod store;

pub use backend::{ActivationResult, BackendApi};
pub use error::{BackendError, ConnectionError, GatewayError, GatewayResult, ToolCallError};
pub use events::{ConnectionEvent, ConnectionPhase, EventKind};
pub use executor::{ToolCallParams, ToolExecutor};
pub use gateway::{HttpGateway, LocalGateway, SessionGateway};
pub use manager::{ConnectOutcome, ConnectionManager, EventHandler, HandlerId};
pub use store::{ConnectionRecord, ConnectionStore, DEFAULT_RETENTION};
