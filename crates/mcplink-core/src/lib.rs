//! Core session management for mcplink.
//!
//! This crate provides the server-side coordination layer:
//! - Configuration management (multi-source, JSONC support)
//! - Caller identity resolution
//! - The session store (live clients plus write-through metadata)
//! - The session service: connect, OAuth callback, tool calls, disconnect

pub mod config;
pub mod error;
pub mod identity;
pub mod service;
pub mod session;
pub mod store;

pub use config::Config;
pub use error::{ConfigError, CoreError, CoreResult, Phase, SessionError, SessionResult};
pub use identity::{
    Credentials, HeaderIdentity, IdentityChain, IdentityProvider, StaticTokenIdentity,
};
pub use service::{
    CallbackParams, ClientFactory, ConnectResponse, HttpClientFactory, OAuthRedirect,
    RedirectStep, ServerConfigView, SessionService,
};
pub use session::{ConnectionStatus, ServerTarget, SessionRecord, SessionSummary};
pub use store::{SessionHandle, SessionSlot, SessionStore};
