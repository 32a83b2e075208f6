//! Error types for the client runtime.

use crate::events::ConnectionPhase;
use mcplink_core::SessionError;
use mcplink_mcp::is_session_invalid_message;
use std::sync::Arc;
use thiserror::Error;

/// Failures reported by a `SessionGateway`.
///
/// The structured variants carry the service's own message.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    SessionNotFound(String),

    #[error("{0}")]
    SessionExpired(String),

    #[error("{0}")]
    AuthorizationRequired(String),

    #[error("{0}")]
    TransportUnavailable(String),

    #[error("{0}")]
    TokenRefreshFailed(String),

    #[error("{0}")]
    StoreUnavailable(String),

    /// The gateway rejected our own credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other failure reported by the service.
    #[error("{message}")]
    Remote { code: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Rebuild an error from the wire `code` and message.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "SESSION_NOT_FOUND" => Self::SessionNotFound(message),
            "SESSION_EXPIRED" => Self::SessionExpired(message),
            "AUTH_REQUIRED" => Self::AuthorizationRequired(message),
            "TRANSPORT_UNAVAILABLE" => Self::TransportUnavailable(message),
            "TOKEN_REFRESH_FAILED" => Self::TokenRefreshFailed(message),
            "STORE_UNAVAILABLE" => Self::StoreUnavailable(message),
            "UNAUTHORIZED" => Self::Unauthorized(message),
            other => Self::Remote {
                code: other.to_string(),
                message,
            },
        }
    }

    /// Whether the session behind the call is gone and a reconnect may help.
    ///
    /// Structured codes win; the message patterns are kept for services that
    /// only report session loss in text.
    pub fn is_session_invalid(&self) -> bool {
        match self {
            Self::SessionExpired(_) | Self::SessionNotFound(_) => true,
            Self::Http(_) | Self::Json(_) => false,
            other => is_session_invalid_message(&other.to_string()),
        }
    }
}

impl GatewayError {
    /// Whether the session lost its authorization and only a new
    /// authorization (a fresh connect) can restore it.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationRequired(_) | Self::TokenRefreshFailed(_)
        )
    }
}

impl From<SessionError> for GatewayError {
    fn from(err: SessionError) -> Self {
        Self::from_code(err.code(), err.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure of a backend API call.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// Failures of the connection manager and the connection store.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The gateway failed during `phase`.
    #[error("Connection failed during {phase}: {source}")]
    Gateway {
        phase: ConnectionPhase,
        #[source]
        source: Arc<GatewayError>,
    },

    /// Tearing a session down failed.
    #[error("Disconnect failed: {source}")]
    Disconnect {
        #[source]
        source: Arc<GatewayError>,
    },

    /// The attempt was cancelled locally before it finished.
    #[error("Connection attempt for {server_id} was cancelled")]
    Cancelled { server_id: String },

    /// A connection record violated its invariants.
    #[error("Invalid connection record: {0}")]
    InvalidRecord(String),

    #[error("Connection store error: {0}")]
    Store(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl ConnectionError {
    pub fn gateway(phase: ConnectionPhase, err: GatewayError) -> Self {
        Self::Gateway {
            phase,
            source: Arc::new(err),
        }
    }

    /// The phase that failed, when known.
    pub fn phase(&self) -> Option<ConnectionPhase> {
        match self {
            Self::Gateway { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Message suitable for showing to the end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Gateway { phase, source } => match source.as_ref() {
                GatewayError::AuthorizationRequired(_) | GatewayError::TokenRefreshFailed(_) => {
                    "The server needs to be authorized again.".to_string()
                }
                GatewayError::TransportUnavailable(message) => {
                    format!("Could not reach the server while {}: {message}", phase.describe())
                }
                GatewayError::StoreUnavailable(_) => {
                    "Connection state is unavailable right now. Try again shortly.".to_string()
                }
                GatewayError::Unauthorized(_) => "You are not signed in.".to_string(),
                other => format!("Connection failed while {}: {other}", phase.describe()),
            },
            Self::Disconnect { source } => format!("Could not disconnect: {source}"),
            Self::Cancelled { .. } => "The connection was cancelled.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<mcplink_storage::StorageError> for ConnectionError {
    fn from(err: mcplink_storage::StorageError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<BackendError> for ConnectionError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err.0)
    }
}

/// Failures of `ToolExecutor::execute_tool_call`.
#[derive(Debug, Error)]
pub enum ToolCallError {
    /// Nothing is known about how to reach this server.
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// The connection store could not be read.
    #[error("Connection store error: {0}")]
    Store(#[source] ConnectionError),

    /// The reconnect needed before the call did not succeed.
    #[error("Reconnect failed: {0}")]
    Reconnect(#[source] ConnectionError),

    /// The server must be authorized before tools can be called.
    #[error("Authorization required for {server_name}")]
    AuthorizationRequired {
        server_name: String,
        authorization_url: String,
    },

    /// The call itself failed.
    #[error("{0}")]
    Call(#[source] GatewayError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code() {
        assert!(matches!(
            GatewayError::from_code("SESSION_EXPIRED", "gone"),
            GatewayError::SessionExpired(_)
        ));
        assert!(matches!(
            GatewayError::from_code("TEAPOT", "short and stout"),
            GatewayError::Remote { .. }
        ));
        assert_eq!(
            GatewayError::from_code("STORE_UNAVAILABLE", "redis down").to_string(),
            "redis down"
        );
    }

    #[test]
    fn test_session_invalid_detection() {
        assert!(GatewayError::SessionExpired("x".into()).is_session_invalid());
        assert!(GatewayError::SessionNotFound("x".into()).is_session_invalid());
        assert!(GatewayError::Remote {
            code: "MCP_ERROR".into(),
            message: "Session ID required".into(),
        }
        .is_session_invalid());
        assert!(!GatewayError::TransportUnavailable("refused".into()).is_session_invalid());
    }

    #[test]
    fn test_from_session_error() {
        let err: GatewayError = SessionError::not_found("mcs_1").into();
        assert!(matches!(err, GatewayError::SessionNotFound(_)));
        assert!(err.to_string().contains("mcs_1"));
    }

    #[test]
    fn test_user_message_keeps_phase() {
        let err = ConnectionError::gateway(
            ConnectionPhase::Discovering,
            GatewayError::TransportUnavailable("connection refused".into()),
        );
        assert_eq!(err.phase(), Some(ConnectionPhase::Discovering));
        assert!(err.user_message().contains("connection refused"));
        assert!(err.user_message().contains("discovering tools"));
    }
}
