//! OAuth `state` parameter codec.
//!
//! The state carries `{"sessionId": .., "serverName": ..}` through the
//! authorization server so the callback can find the session that started
//! the handshake. Older links carried the bare session id; decoding accepts
//! both.

use serde::{Deserialize, Serialize};

/// Correlation data carried in the OAuth `state` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationState {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl CorrelationState {
    pub fn new(session_id: impl Into<String>, server_name: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            server_name,
        }
    }

    /// Encode as a JSON string.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.session_id.clone())
    }

    /// Decode a raw state value. Never fails: anything that is not a JSON
    /// object with a non-empty `sessionId` is taken as a bare session id.
    pub fn decode(raw: &str) -> Self {
        match serde_json::from_str::<CorrelationState>(raw) {
            Ok(state) if !state.session_id.is_empty() => state,
            _ => Self::new(raw, None),
        }
    }
}
