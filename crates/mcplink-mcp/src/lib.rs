//! Model Context Protocol (MCP) session client for mcplink.
//!
//! One `McpSessionClient` talks to one remote tool server on behalf of one
//! session: it runs the initialize handshake, the OAuth 2.0 authorization
//! code flow with PKCE when the server demands it, and tool discovery and
//! invocation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌───────────┐     ┌─────────────┐
//! │ McpSessionClient │────▶│ Transport │────▶│ tool server │
//! │                  │     └───────────┘     └─────────────┘
//! │                  │     ┌─────────────────────┐
//! │                  │────▶│ AuthorizationServer │
//! └──────────────────┘     └─────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mcplink_mcp::{
//!     ConnectOutcome, HttpAuthorizationServer, HttpTransport, HttpTransportConfig,
//!     McpSessionClient, OAuthConfig, SessionClientConfig, TransportKind,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), mcplink_mcp::McpError> {
//! let url = "https://mcp.example.com/mcp".to_string();
//! let transport = HttpTransport::new(HttpTransportConfig {
//!     url: url.clone(),
//!     ..Default::default()
//! })?;
//! let client = McpSessionClient::new(
//!     SessionClientConfig {
//!         session_id: "mcs_01J0".to_string(),
//!         server_name: "github".to_string(),
//!         server_url: url,
//!         transport_kind: TransportKind::StreamableHttp,
//!         oauth: OAuthConfig::default(),
//!     },
//!     Arc::new(transport),
//!     Arc::new(HttpAuthorizationServer::new()),
//! );
//!
//! if let ConnectOutcome::RequiresAuth { authorization_url } = client.connect().await? {
//!     println!("Authorize at {authorization_url}");
//! }
//! # Ok(())
//! # }
//! ```

mod client;
pub mod correlation;
mod error;
pub mod http;
pub mod oauth;
pub mod protocol;
pub mod sse;
mod transport;

pub use client::{ConnectOutcome, McpSessionClient, SessionClientConfig, TokenStatus};
pub use correlation::CorrelationState;
pub use error::{is_session_invalid_message, McpError, McpResult};
pub use http::{HttpTransport, HttpTransportConfig};
pub use oauth::{
    AuthServerMetadata, AuthorizationServer, ClientInfo, HttpAuthorizationServer, OAuthConfig,
    OAuthProvider, OAuthTokens, RegistrationRequest, StoredTokens, OAUTH_CALLBACK_PATH,
};
pub use protocol::{McpTool, ToolCallResult, ToolContent};
pub use sse::{SseConfig, SseTransport};
pub use transport::{Transport, TransportKind};
