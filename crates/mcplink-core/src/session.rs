//! Session data model.

use chrono::{DateTime, Utc};
use mcplink_mcp::{StoredTokens, TransportKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection status of a session or of a client-side connection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connecting,
    Authenticating,
    Authenticated,
    Discovering,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "CONNECTING",
            ConnectionStatus::Authenticating => "AUTHENTICATING",
            ConnectionStatus::Authenticated => "AUTHENTICATED",
            ConnectionStatus::Discovering => "DISCOVERING",
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Disconnected => "DISCONNECTED",
            ConnectionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The remote tool server a session targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTarget {
    /// Registry id of the server.
    pub server_id: String,
    pub server_name: String,
    pub server_url: String,
    #[serde(default)]
    pub transport: TransportKind,
}

/// Authoritative session metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub server_id: String,
    pub server_name: String,
    pub server_url: String,
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<StoredTokens>,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub connection_status: ConnectionStatus,
}

impl SessionRecord {
    /// A fresh record for `target`, owned by `user_id`.
    pub fn new(session_id: String, user_id: String, target: &ServerTarget) -> Self {
        Self {
            session_id,
            user_id,
            server_id: target.server_id.clone(),
            server_name: target.server_name.clone(),
            server_url: target.server_url.clone(),
            transport: target.transport,
            tokens: None,
            created_at: Utc::now(),
            active: false,
            connection_status: ConnectionStatus::Connecting,
        }
    }

    /// Set the status; the session is active exactly when connected.
    pub fn set_status(&mut self, status: ConnectionStatus) {
        self.connection_status = status;
        self.active = status == ConnectionStatus::Connected;
    }

    /// Inactive and waiting for the OAuth callback.
    pub fn awaiting_authorization(&self) -> bool {
        !self.active && self.connection_status == ConnectionStatus::Authenticating
    }

    /// Token-free view for listings.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            server_id: self.server_id.clone(),
            server_name: self.server_name.clone(),
            server_url: self.server_url.clone(),
            transport: self.transport,
            active: self.active,
            connection_status: self.connection_status,
            created_at: self.created_at,
            token_expires_at: self.tokens.as_ref().and_then(|t| t.expires_at),
        }
    }
}

/// What listings expose about a session. Never carries tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub server_id: String,
    pub server_name: String,
    pub server_url: String,
    pub transport: TransportKind,
    pub active: bool,
    pub connection_status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ServerTarget {
        ServerTarget {
            server_id: "srv-1".to_string(),
            server_name: "github".to_string(),
            server_url: "https://github.mcp.test/mcp".to_string(),
            transport: TransportKind::Sse,
        }
    }

    #[test]
    fn test_status_controls_active() {
        let mut record = SessionRecord::new("s1".to_string(), "alice".to_string(), &target());
        assert!(!record.active);
        record.set_status(ConnectionStatus::Connected);
        assert!(record.active);
        record.set_status(ConnectionStatus::Authenticating);
        assert!(!record.active);
    }

    #[test]
    fn test_summary_hides_tokens() {
        let mut record = SessionRecord::new("s1".to_string(), "alice".to_string(), &target());
        record.tokens = Some(StoredTokens {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            expires_at: Some(42),
            scope: None,
        });
        let json = serde_json::to_string(&record.summary()).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"tokenExpiresAt\":42"));
        assert!(json.contains("\"transport\":\"sse\""));
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&ConnectionStatus::Authenticating).unwrap();
        assert_eq!(json, "\"AUTHENTICATING\"");
        assert_eq!(ConnectionStatus::Connected.to_string(), "CONNECTED");
    }
}
