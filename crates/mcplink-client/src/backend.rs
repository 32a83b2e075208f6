//! Backend query/mutation API consumed by the client runtime.

use crate::error::BackendError;
use async_trait::async_trait;
use mcplink_core::ConnectionStatus;
use mcplink_mcp::McpTool;
use serde::{Deserialize, Serialize};

/// Outcome of activating a server in the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationResult {
    pub connection_status: ConnectionStatus,
    #[serde(default)]
    pub tools: Vec<McpTool>,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
}

/// Server registry operations owned by the backend.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn activate(&self, server_name: &str) -> Result<ActivationResult, BackendError>;

    async fn deactivate(&self, server_name: &str) -> Result<(), BackendError>;

    async fn restart(&self, server_name: &str) -> Result<(), BackendError>;

    async fn set_enabled(&self, server_name: &str, enabled: bool) -> Result<(), BackendError>;
}
