//! Protocol client for a single MCP session.
//!
//! `McpSessionClient` owns one transport and the OAuth state for one
//! session. It performs the initialize handshake, drives the authorization
//! code flow when the server demands it, and exposes tool discovery and
//! invocation. It never reconnects on its own; callers decide what to do
//! with a `SessionExpired`.

use crate::correlation::CorrelationState;
use crate::error::{is_session_invalid_message, McpError, McpResult};
use crate::oauth::{
    build_auth_url, AuthServerMetadata, AuthorizationServer, OAuthConfig, OAuthProvider,
    StoredTokens,
};
use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, ListToolsResult, McpTool, ToolCallResult,
};
use crate::transport::{Transport, TransportKind};
use mcplink_util::now_secs;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Static description of one session's server.
#[derive(Debug, Clone)]
pub struct SessionClientConfig {
    pub session_id: String,
    pub server_name: String,
    pub server_url: String,
    pub transport_kind: TransportKind,
    pub oauth: OAuthConfig,
}

/// Result of `McpSessionClient::connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Handshake complete; tools may be listed and called.
    Connected,
    /// The server requires authorization; send the user to the URL.
    RequiresAuth { authorization_url: String },
}

/// Outcome of `McpSessionClient::get_valid_tokens`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    /// Stored tokens are still valid.
    Valid,
    /// Tokens were expired and have been refreshed.
    Refreshed,
    /// No tokens are held (the server may not need any).
    Missing,
    /// Tokens are expired and could not be refreshed.
    RefreshFailed(String),
}

/// MCP client bound to one session.
pub struct McpSessionClient {
    config: SessionClientConfig,
    transport: Arc<dyn Transport>,
    oauth: OAuthProvider,
    auth_server: Arc<dyn AuthorizationServer>,
    /// Request ID counter.
    next_id: AtomicU64,
    initialized: AtomicBool,
    server_info: RwLock<Option<InitializeResult>>,
}

impl McpSessionClient {
    /// Create a client. No network traffic happens until `connect`.
    pub fn new(
        config: SessionClientConfig,
        transport: Arc<dyn Transport>,
        auth_server: Arc<dyn AuthorizationServer>,
    ) -> Self {
        let oauth = OAuthProvider::new(config.server_name.clone(), config.oauth.clone());
        Self {
            config,
            transport,
            oauth,
            auth_server,
            next_id: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
            server_info: RwLock::new(None),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn server_name(&self) -> &str {
        &self.config.server_name
    }

    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.config.transport_kind
    }

    /// Whether the initialize handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Current token state.
    pub async fn tokens(&self) -> Option<StoredTokens> {
        self.oauth.tokens().await
    }

    /// Server info reported during the handshake.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.read().await.clone()
    }

    /// Seed tokens obtained elsewhere (e.g. restored from storage).
    pub async fn restore_tokens(&self, tokens: StoredTokens) {
        let usable = !tokens.is_expired_at(now_secs());
        let access_token = tokens.access_token.clone();
        self.oauth.set_tokens(Some(tokens)).await;
        if usable {
            self.transport.set_auth_token(Some(access_token)).await;
        }
    }

    /// Connect to the server.
    ///
    /// Returns `RequiresAuth` with the authorization URL when the server
    /// answers the handshake with 401. The session is not connected in that
    /// case; `finish_auth` completes it.
    pub async fn connect(&self) -> McpResult<ConnectOutcome> {
        match self.get_valid_tokens().await {
            TokenStatus::Valid | TokenStatus::Refreshed | TokenStatus::Missing => {}
            TokenStatus::RefreshFailed(reason) => {
                debug!(server = %self.config.server_name, %reason, "Stored tokens unusable");
                self.transport.set_auth_token(None).await;
            }
        }

        match self.initialize().await {
            Ok(()) => Ok(ConnectOutcome::Connected),
            Err(McpError::AuthRequired) => {
                info!(server = %self.config.server_name, "Server requires authorization");
                let authorization_url = self.start_authorization().await?;
                Ok(ConnectOutcome::RequiresAuth { authorization_url })
            }
            Err(e) => Err(e),
        }
    }

    /// Complete a pending authorization with the code from the redirect.
    ///
    /// Exchanges the code, stores the tokens and re-runs the handshake. The
    /// pending state is consumed first, so a replayed code fails.
    pub async fn finish_auth(&self, code: &str) -> McpResult<()> {
        let verifier = self.oauth.take_code_verifier().await?;
        let metadata = self
            .oauth
            .metadata()
            .await
            .ok_or_else(|| McpError::auth_failed("Authorization server metadata missing"))?;
        let client = self
            .oauth
            .client_info()
            .await
            .ok_or_else(|| McpError::auth_failed("OAuth client not registered"))?;

        let tokens = self
            .auth_server
            .exchange_code(
                &metadata,
                &client,
                code,
                &self.oauth.redirect_url(),
                &verifier,
            )
            .await?;
        let stored = self.oauth.save_tokens(tokens).await;
        self.transport
            .set_auth_token(Some(stored.access_token))
            .await;

        info!(server = %self.config.server_name, "Authorization completed");
        self.initialize().await
    }

    /// List the server's tools.
    pub async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        self.ensure_initialized()?;

        let request = JsonRpcRequest::new(self.next_request_id(), "tools/list", None);
        let response = self.transport.request(request).await?;

        if let Some(error) = response.error {
            return Err(rpc_error(error, McpError::protocol_error));
        }

        let result: ListToolsResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol_error("Missing tools/list result"))?,
        )
        .map_err(|e| McpError::protocol_error(e.to_string()))?;

        Ok(result.tools)
    }

    /// Call a tool.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<ToolCallResult> {
        self.ensure_initialized()?;

        debug!(tool = name, server = %self.config.server_name, "Calling MCP tool");

        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        let request = JsonRpcRequest::new(
            self.next_request_id(),
            "tools/call",
            Some(serde_json::to_value(&params)?),
        );

        let response = self.transport.request(request).await?;

        if let Some(error) = response.error {
            return Err(rpc_error(error, McpError::tool_error));
        }

        let result: ToolCallResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol_error("Missing tools/call result"))?,
        )
        .map_err(|e| McpError::protocol_error(e.to_string()))?;

        Ok(result)
    }

    /// Make sure the held access token is usable, refreshing it if needed.
    ///
    /// Failures are reported in the returned status, never raised.
    pub async fn get_valid_tokens(&self) -> TokenStatus {
        let Some(tokens) = self.oauth.tokens().await else {
            return TokenStatus::Missing;
        };
        if !tokens.is_expired_at(now_secs()) {
            return TokenStatus::Valid;
        }

        let Some(refresh_token) = tokens.refresh_token else {
            return TokenStatus::RefreshFailed("no refresh token available".to_string());
        };

        let metadata = match self.discover().await {
            Ok(metadata) => metadata,
            Err(e) => return TokenStatus::RefreshFailed(e.to_string()),
        };
        let Some(client) = self.oauth.client_info().await else {
            return TokenStatus::RefreshFailed("OAuth client not registered".to_string());
        };

        match self
            .auth_server
            .refresh(&metadata, &client, &refresh_token)
            .await
        {
            Ok(new_tokens) => {
                let stored = self.oauth.save_tokens(new_tokens).await;
                self.transport
                    .set_auth_token(Some(stored.access_token))
                    .await;
                info!(server = %self.config.server_name, "Refreshed access token");
                TokenStatus::Refreshed
            }
            Err(e) => {
                warn!(server = %self.config.server_name, error = %e, "Token refresh failed");
                TokenStatus::RefreshFailed(e.to_string())
            }
        }
    }

    /// Close the transport. The client cannot be used afterwards until a new
    /// `connect`.
    pub async fn close(&self) -> McpResult<()> {
        self.initialized.store(false, Ordering::SeqCst);
        self.transport.close().await
    }

    fn ensure_initialized(&self) -> McpResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(McpError::NotAuthenticated)
        }
    }

    async fn initialize(&self) -> McpResult<()> {
        let init_params = InitializeParams::default();
        let request = JsonRpcRequest::new(
            self.next_request_id(),
            "initialize",
            Some(serde_json::to_value(&init_params)?),
        );

        let response = self.transport.request(request).await?;

        if let Some(error) = response.error {
            return Err(rpc_error(error, |msg| {
                McpError::protocol_error(format!("Initialization failed: {msg}"))
            }));
        }

        let init_result: InitializeResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol_error("Missing initialize result"))?,
        )
        .map_err(|e| McpError::protocol_error(e.to_string()))?;

        debug!(
            server = %self.config.server_name,
            protocol_version = %init_result.protocol_version,
            remote = %init_result.server_info.name,
            "MCP server initialized"
        );

        let notification = JsonRpcNotification::new("notifications/initialized", None);
        self.transport.notify(notification).await?;

        *self.server_info.write().await = Some(init_result);
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn discover(&self) -> McpResult<AuthServerMetadata> {
        if let Some(metadata) = self.oauth.metadata().await {
            return Ok(metadata);
        }
        let metadata = self.auth_server.metadata(&self.config.server_url).await?;
        self.oauth.save_metadata(metadata.clone()).await;
        Ok(metadata)
    }

    async fn start_authorization(&self) -> McpResult<String> {
        let metadata = self.discover().await?;

        let client = match self.oauth.client_info().await {
            Some(client) => client,
            None => {
                let client = self
                    .auth_server
                    .register(&metadata, &self.oauth.client_metadata())
                    .await?;
                self.oauth.save_client_info(client.clone()).await;
                client
            }
        };

        let verifier = OAuthProvider::generate_code_verifier();
        let challenge = OAuthProvider::generate_code_challenge(&verifier);
        let state = CorrelationState::new(
            self.config.session_id.clone(),
            Some(self.config.server_name.clone()),
        )
        .encode();
        self.oauth.begin_authorization(verifier, state.clone()).await;

        Ok(build_auth_url(
            &metadata.authorization_endpoint,
            &client.client_id,
            &self.oauth.redirect_url(),
            self.oauth.scope(),
            &state,
            &challenge,
        ))
    }
}

/// Map a JSON-RPC error, recognising session invalidity by its message.
fn rpc_error(error: JsonRpcError, otherwise: impl FnOnce(String) -> McpError) -> McpError {
    if is_session_invalid_message(&error.message) {
        McpError::SessionExpired(error.message)
    } else {
        otherwise(error.message)
    }
}
