//! Connection phase events.

use mcplink_core::{ConnectionStatus, ServerTarget};
use mcplink_mcp::TransportKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named step in establishing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Connecting,
    Authenticating,
    Authenticated,
    Discovering,
    Connected,
    Error,
}

impl ConnectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Authenticating => "authenticating",
            ConnectionPhase::Authenticated => "authenticated",
            ConnectionPhase::Discovering => "discovering",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Error => "error",
        }
    }

    /// No further events follow a terminal phase within one attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionPhase::Connected | ConnectionPhase::Error)
    }

    /// Status mirrored into the connection record.
    pub fn status(&self) -> ConnectionStatus {
        match self {
            ConnectionPhase::Connecting => ConnectionStatus::Connecting,
            ConnectionPhase::Authenticating => ConnectionStatus::Authenticating,
            ConnectionPhase::Authenticated => ConnectionStatus::Authenticated,
            ConnectionPhase::Discovering => ConnectionStatus::Discovering,
            ConnectionPhase::Connected => ConnectionStatus::Connected,
            ConnectionPhase::Error => ConnectionStatus::Failed,
        }
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Authenticating => "checking authorization",
            ConnectionPhase::Authenticated => "completing authorization",
            ConnectionPhase::Discovering => "discovering tools",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Error => "recovering from an error",
        }
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handler subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Phase(ConnectionPhase),
    All,
}

impl From<ConnectionPhase> for EventKind {
    fn from(phase: ConnectionPhase) -> Self {
        EventKind::Phase(phase)
    }
}

/// One phase transition of one connection attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEvent {
    pub server_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub phase: ConnectionPhase,
    pub server_name: String,
    pub server_url: String,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_phase: Option<ConnectionPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
}

impl ConnectionEvent {
    pub fn new(phase: ConnectionPhase, target: &ServerTarget) -> Self {
        Self {
            server_id: target.server_id.clone(),
            session_id: None,
            phase,
            server_name: target.server_name.clone(),
            server_url: target.server_url.clone(),
            transport: target.transport,
            tool_count: None,
            error: None,
            error_phase: None,
            authorization_url: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tool_count(mut self, count: usize) -> Self {
        self.tool_count = Some(count);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>, phase: ConnectionPhase) -> Self {
        self.error = Some(error.into());
        self.error_phase = Some(phase);
        self
    }

    pub fn with_authorization_url(mut self, url: impl Into<String>) -> Self {
        self.authorization_url = Some(url.into());
        self
    }

    /// Whether a handler registered for `kind` receives this event.
    pub fn matches(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::All => true,
            EventKind::Phase(phase) => phase == self.phase,
        }
    }
}
