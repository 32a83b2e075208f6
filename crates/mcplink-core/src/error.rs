//! Error types for the core crate.

use mcplink_mcp::McpError;
use mcplink_storage::StorageError;
use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid JSON/JSONC syntax.
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    /// Config validation failed.
    #[error("config validation failed: {message}")]
    Validation { message: String },

    /// Environment variable not found during substitution.
    #[error("environment variable not found: {name}")]
    EnvVarNotFound { name: String },

    /// File reference not found during substitution.
    #[error("file reference not found: {path}")]
    FileRefNotFound { path: String },
}

/// Where in the lifecycle a transport failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Authorize,
    Discover,
    ToolCall,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Connect => "connect",
            Phase::Authorize => "authorize",
            Phase::Discover => "discover",
            Phase::ToolCall => "tool_call",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session-specific errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No live session with this id (or it belongs to another user).
    #[error("Session not found: {id}")]
    NotFound { id: String },

    /// The OAuth state does not name a session awaiting authorization.
    #[error("Invalid or expired session: {0}")]
    InvalidSession(String),

    /// The session is waiting for the user to authorize.
    #[error("Authorization required for session {id}")]
    AuthorizationRequired { id: String },

    /// The remote server dropped the protocol session. `message` is the
    /// server's own wording.
    #[error("Session expired ({id}): {message}")]
    SessionExpired { id: String, message: String },

    /// The remote server could not be reached.
    #[error("Transport unavailable during {phase}: {message}")]
    TransportUnavailable { phase: Phase, message: String },

    /// Stored tokens are expired and could not be refreshed.
    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    /// The session store backend failed.
    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    /// A session with this id already exists.
    #[error("Session already exists: {id}")]
    AlreadyExists { id: String },

    /// Any other protocol-level failure.
    #[error(transparent)]
    Mcp(#[from] McpError),
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::StoreUnavailable(err.to_string())
    }
}

impl SessionError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Classify a protocol error raised while working on `session_id`.
    pub fn from_mcp(err: McpError, session_id: &str, phase: Phase) -> Self {
        if err.is_session_invalid() {
            let message = match err {
                McpError::SessionExpired(message)
                | McpError::ProtocolError(message)
                | McpError::ToolError(message) => message,
                other => other.to_string(),
            };
            return Self::SessionExpired {
                id: session_id.to_string(),
                message,
            };
        }
        if err.is_transport_failure() {
            return Self::TransportUnavailable {
                phase,
                message: err.to_string(),
            };
        }
        match err {
            McpError::AuthRequired | McpError::NotAuthenticated => Self::AuthorizationRequired {
                id: session_id.to_string(),
            },
            McpError::TokenRefreshFailed(reason) => Self::TokenRefreshFailed(reason),
            other => Self::Mcp(other),
        }
    }

    /// Stable machine-readable code carried on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "SESSION_NOT_FOUND",
            Self::InvalidSession(_) => "INVALID_SESSION",
            Self::AuthorizationRequired { .. } => "AUTH_REQUIRED",
            Self::SessionExpired { .. } => "SESSION_EXPIRED",
            Self::TransportUnavailable { .. } => "TRANSPORT_UNAVAILABLE",
            Self::TokenRefreshFailed(_) => "TOKEN_REFRESH_FAILED",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::AlreadyExists { .. } => "SESSION_EXISTS",
            Self::Mcp(McpError::ToolError(_)) => "TOOL_ERROR",
            Self::Mcp(_) => "MCP_ERROR",
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_mcp_classification() {
        let expired =
            SessionError::from_mcp(McpError::session_expired("gone"), "s1", Phase::ToolCall);
        assert!(matches!(expired, SessionError::SessionExpired { ref id, .. } if id == "s1"));
        assert_eq!(expired.to_string(), "Session expired (s1): gone");

        let by_message =
            SessionError::from_mcp(McpError::tool_error("Invalid session"), "s1", Phase::ToolCall);
        assert_eq!(by_message.code(), "SESSION_EXPIRED");
        assert!(by_message.to_string().ends_with(": Invalid session"));

        let transport =
            SessionError::from_mcp(McpError::connection_failed("refused"), "s1", Phase::Connect);
        assert!(matches!(
            transport,
            SessionError::TransportUnavailable { phase: Phase::Connect, .. }
        ));

        let auth = SessionError::from_mcp(McpError::NotAuthenticated, "s1", Phase::ToolCall);
        assert_eq!(auth.code(), "AUTH_REQUIRED");

        let tool = SessionError::from_mcp(McpError::tool_error("bad args"), "s1", Phase::ToolCall);
        assert_eq!(tool.code(), "TOOL_ERROR");
        assert_eq!(tool.to_string(), "Tool execution failed: bad args");
    }

    #[test]
    fn test_storage_error_is_store_unavailable() {
        let err: SessionError = StorageError::unavailable("offline").into();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        assert!(err.to_string().contains("offline"));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            SessionError::not_found("s9").to_string(),
            "Session not found: s9"
        );
        let err = SessionError::TransportUnavailable {
            phase: Phase::Discover,
            message: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "Transport unavailable during discover: timeout");
    }
}
