//! Tool invocation with a bounded reconnect.
//!
//! A call resolves its session from the connection store. Without a cached
//! session the executor reconnects once before calling. When the call
//! reports that the session is gone it reconnects once more and retries;
//! a second session failure is returned as is. A session that lost its
//! authorization (refresh failed) gets the same single reconnect, which
//! surfaces a fresh authorization URL.

use crate::error::{GatewayError, ToolCallError};
use crate::manager::{ConnectOutcome, ConnectionManager};
use mcplink_core::ServerTarget;
use mcplink_mcp::{is_session_invalid_message, ToolCallResult};
use mcplink_storage::Storage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

/// One tool call addressed by server name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallParams {
    pub server_name: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallParams {
    pub fn new(
        server_name: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Runs tool calls against the sessions a `ConnectionManager` maintains.
pub struct ToolExecutor<S: Storage> {
    manager: ConnectionManager<S>,
    /// Known servers by name, used when no record says how to reconnect.
    targets: RwLock<HashMap<String, ServerTarget>>,
}

impl<S: Storage + 'static> ToolExecutor<S> {
    pub fn new(manager: ConnectionManager<S>) -> Self {
        Self {
            manager,
            targets: RwLock::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &ConnectionManager<S> {
        &self.manager
    }

    /// Make a server reachable by name.
    pub fn register(&self, target: ServerTarget) {
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.server_name.clone(), target);
    }

    /// Call a tool, reconnecting at most once when the session is missing
    /// and at most once when the call finds it gone.
    pub async fn execute_tool_call(
        &self,
        params: ToolCallParams,
    ) -> Result<ToolCallResult, ToolCallError> {
        let mut session_id = match self.cached_session(&params.server_name).await? {
            Some(session_id) => session_id,
            None => {
                info!(server = %params.server_name, "No cached session, reconnecting");
                self.reconnect(&params.server_name).await?
            }
        };
        let mut retried = false;

        loop {
            debug!(
                server = %params.server_name,
                tool = %params.tool_name,
                session_id = %session_id,
                retried,
                "Calling tool"
            );
            let outcome = self
                .manager
                .gateway()
                .call_tool(&session_id, &params.tool_name, params.arguments.clone())
                .await;

            let failure = match outcome {
                Ok(result) if result.is_error => {
                    let text = result.text_content();
                    if !is_session_invalid_message(&text) {
                        return Ok(result);
                    }
                    GatewayError::SessionExpired(text)
                }
                Ok(result) => return Ok(result),
                Err(e) if e.is_session_invalid() => e,
                Err(e) if e.requires_reauthorization() && !retried => {
                    // The cached session cannot recover on its own; a fresh
                    // connect yields a new authorization URL.
                    info!(
                        server = %params.server_name,
                        error = %e,
                        "Session needs authorization again, reconnecting"
                    );
                    self.drop_stale(&session_id).await;
                    retried = true;
                    session_id = self.reconnect(&params.server_name).await?;
                    continue;
                }
                Err(e) => return Err(ToolCallError::Call(e)),
            };

            if retried {
                warn!(
                    server = %params.server_name,
                    error = %failure,
                    "Session invalid again after reconnect"
                );
                return Err(ToolCallError::Call(failure));
            }

            info!(
                server = %params.server_name,
                error = %failure,
                "Session invalid, reconnecting once"
            );
            retried = true;
            session_id = self.reconnect(&params.server_name).await?;
        }
    }

    async fn drop_stale(&self, session_id: &str) {
        if let Err(e) = self.manager.disconnect(session_id).await {
            debug!(session_id = %session_id, error = %e, "Could not drop stale session");
        }
    }

    async fn cached_session(&self, server_name: &str) -> Result<Option<String>, ToolCallError> {
        let record = self
            .manager
            .store()
            .find_by_server_name(server_name)
            .await
            .map_err(ToolCallError::Store)?;
        Ok(record
            .filter(|record| record.is_connected())
            .map(|record| record.session_id))
    }

    async fn target_for(&self, server_name: &str) -> Result<ServerTarget, ToolCallError> {
        let registered = self
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server_name)
            .cloned();
        if let Some(target) = registered {
            return Ok(target);
        }

        let record = self
            .manager
            .store()
            .find_by_server_name(server_name)
            .await
            .map_err(ToolCallError::Store)?;
        match record {
            Some(record) => Ok(ServerTarget {
                server_id: record.server_id,
                server_name: record.server_name,
                server_url: record.url,
                transport: record.transport,
            }),
            None => Err(ToolCallError::UnknownServer(server_name.to_string())),
        }
    }

    async fn reconnect(&self, server_name: &str) -> Result<String, ToolCallError> {
        let target = self.target_for(server_name).await?;
        match self.manager.connect(target).await {
            Ok(ConnectOutcome::Connected { session_id, .. }) => Ok(session_id),
            Ok(ConnectOutcome::RequiresAuth {
                authorization_url, ..
            }) => Err(ToolCallError::AuthorizationRequired {
                server_name: server_name.to_string(),
                authorization_url,
            }),
            Err(e) => Err(ToolCallError::Reconnect(e)),
        }
    }
}
