//! MCP error types.

use std::sync::OnceLock;
use thiserror::Error;

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors that can occur while talking to a remote tool server.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server answered 401; an authorization handshake is needed.
    #[error("Authentication required")]
    AuthRequired,

    /// The authorization handshake failed (bad code, replayed state, ...).
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The server no longer recognises the protocol session.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The initialize handshake has not completed.
    #[error("Not authenticated: call connect first")]
    NotAuthenticated,

    /// The transport could not reach the server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("Server timeout")]
    Timeout,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Tool execution failed.
    #[error("Tool execution failed: {0}")]
    ToolError(String),

    /// The refresh token was rejected or missing.
    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl McpError {
    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a protocol error.
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::ProtocolError(message.into())
    }

    /// Create a tool error.
    pub fn tool_error(message: impl Into<String>) -> Self {
        Self::ToolError(message.into())
    }

    /// Create an authentication failure.
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed(message.into())
    }

    /// Create a session expired error.
    pub fn session_expired(message: impl Into<String>) -> Self {
        Self::SessionExpired(message.into())
    }

    /// Whether the server-side protocol session is gone.
    ///
    /// Structured variants are checked first; the message patterns cover
    /// servers that only report the condition as text.
    pub fn is_session_invalid(&self) -> bool {
        match self {
            Self::SessionExpired(_) => true,
            Self::ProtocolError(msg) | Self::ToolError(msg) => is_session_invalid_message(msg),
            _ => false,
        }
    }

    /// Whether the transport itself failed (as opposed to the server refusing).
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::Timeout | Self::Io(_) | Self::Http(_)
        )
    }
}

static SESSION_INVALID_REGEX: OnceLock<regex::Regex> = OnceLock::new();

fn session_invalid_regex() -> &'static regex::Regex {
    SESSION_INVALID_REGEX.get_or_init(|| {
        regex::Regex::new(r"(?i)invalid session|session expired|session id required")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Whether an error message reports an invalid, expired or missing session.
pub fn is_session_invalid_message(message: &str) -> bool {
    session_invalid_regex().is_match(message)
}
