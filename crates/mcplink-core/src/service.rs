//! Session service.
//!
//! The flows behind the HTTP surface: connect, OAuth callback, tool listing
//! and invocation, disconnect. Every operation is scoped to the calling user;
//! sessions of other users are reported as not found.

use crate::config::Config;
use crate::error::{Phase, SessionError, SessionResult};
use crate::session::{ConnectionStatus, ServerTarget, SessionRecord, SessionSummary};
use crate::store::{SessionHandle, SessionStore};
use mcplink_mcp::{
    AuthorizationServer, ConnectOutcome, CorrelationState, HttpAuthorizationServer,
    HttpTransport, HttpTransportConfig, McpSessionClient, McpTool, OAuthConfig,
    SessionClientConfig, SseConfig, SseTransport, TokenStatus, ToolCallResult, Transport,
    TransportKind,
};
use mcplink_storage::Storage;
use mcplink_util::Identifier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Builds the protocol client for a new session.
pub trait ClientFactory: Send + Sync {
    fn create(&self, session_id: &str, target: &ServerTarget) -> SessionResult<McpSessionClient>;
}

/// `ClientFactory` producing HTTP transports and a real authorization server.
pub struct HttpClientFactory {
    oauth: OAuthConfig,
    timeout: Duration,
    auth_server: Arc<dyn AuthorizationServer>,
}

impl HttpClientFactory {
    pub fn new(oauth: OAuthConfig, timeout: Duration) -> Self {
        Self {
            oauth,
            timeout,
            auth_server: Arc::new(HttpAuthorizationServer::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.oauth_config(), config.request_timeout())
    }
}

impl ClientFactory for HttpClientFactory {
    fn create(&self, session_id: &str, target: &ServerTarget) -> SessionResult<McpSessionClient> {
        let transport: Arc<dyn Transport> = match target.transport {
            TransportKind::StreamableHttp => Arc::new(
                HttpTransport::new(HttpTransportConfig {
                    url: target.server_url.clone(),
                    auth_token: None,
                    timeout_secs: self.timeout.as_secs(),
                })
                .map_err(|e| SessionError::from_mcp(e, session_id, Phase::Connect))?,
            ),
            TransportKind::Sse => Arc::new(
                SseTransport::new(SseConfig {
                    url: target.server_url.clone(),
                    auth_token: None,
                    timeout_secs: self.timeout.as_secs(),
                })
                .map_err(|e| SessionError::from_mcp(e, session_id, Phase::Connect))?,
            ),
        };

        Ok(McpSessionClient::new(
            SessionClientConfig {
                session_id: session_id.to_string(),
                server_name: target.server_name.clone(),
                server_url: target.server_url.clone(),
                transport_kind: target.transport,
                oauth: self.oauth.clone(),
            },
            transport,
            self.auth_server.clone(),
        ))
    }
}

/// Result of `SessionService::connect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub session_id: String,
    pub connection_status: ConnectionStatus,
    pub requires_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
}

/// Query parameters of the OAuth redirect back to us.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectStep {
    Success,
    Error,
}

impl RedirectStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectStep::Success => "success",
            RedirectStep::Error => "error",
        }
    }
}

/// Where to send the browser after the OAuth callback. Never carries tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthRedirect {
    pub step: RedirectStep,
    pub session_id: Option<String>,
    pub server: Option<String>,
    pub error: Option<String>,
}

impl OAuthRedirect {
    pub fn success(session_id: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            step: RedirectStep::Success,
            session_id: Some(session_id.into()),
            server: Some(server.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, server: Option<String>) -> Self {
        Self {
            step: RedirectStep::Error,
            session_id: None,
            server,
            error: Some(error.into()),
        }
    }

    /// Append the redirect parameters to the application URL.
    pub fn to_url(&self, base: &str) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("step", self.step.as_str());
        if let Some(session_id) = &self.session_id {
            query.append_pair("sessionId", session_id);
        }
        if let Some(server) = &self.server {
            query.append_pair("server", server);
        }
        if let Some(error) = &self.error {
            query.append_pair("error", error);
        }

        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{base}{separator}{}", query.finish())
    }
}

/// External-facing description of a session's server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfigView {
    pub url: String,
    pub transport: TransportKind,
}

/// Session service.
pub struct SessionService<S: Storage> {
    store: Arc<SessionStore<S>>,
    factory: Arc<dyn ClientFactory>,
}

impl<S: Storage> Clone for SessionService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            factory: self.factory.clone(),
        }
    }
}

impl<S: Storage> SessionService<S> {
    pub fn new(store: Arc<SessionStore<S>>, factory: Arc<dyn ClientFactory>) -> Self {
        Self { store, factory }
    }

    pub fn store(&self) -> &Arc<SessionStore<S>> {
        &self.store
    }

    /// Open a new session for `user_id` against `target`.
    ///
    /// When the server demands authorization the session is stored inactive
    /// with status `AUTHENTICATING` so the OAuth callback can complete it.
    pub async fn connect(
        &self,
        user_id: &str,
        target: ServerTarget,
    ) -> SessionResult<ConnectResponse> {
        let session_id = Identifier::session();
        let client = self.factory.create(&session_id, &target)?;
        let mut record = SessionRecord::new(session_id.clone(), user_id.to_string(), &target);

        debug!(session_id = %session_id, server = %target.server_name, "Connecting session");

        let outcome = match client.connect().await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    debug!(session_id = %session_id, error = %close_err, "Error closing failed session");
                }
                warn!(session_id = %session_id, server = %target.server_name, error = %e, "Connect failed");
                return Err(SessionError::from_mcp(e, &session_id, Phase::Connect));
            }
        };

        match outcome {
            ConnectOutcome::Connected => {
                record.tokens = client.tokens().await;
                record.set_status(ConnectionStatus::Connected);
                self.store.insert(record, client).await?;
                self.store
                    .set_server_session(&target.server_name, &session_id)
                    .await?;

                info!(session_id = %session_id, server = %target.server_name, "Session connected");
                Ok(ConnectResponse {
                    session_id,
                    connection_status: ConnectionStatus::Connected,
                    requires_auth: false,
                    authorization_url: None,
                })
            }
            ConnectOutcome::RequiresAuth { authorization_url } => {
                record.set_status(ConnectionStatus::Authenticating);
                self.store.insert(record, client).await?;

                info!(session_id = %session_id, server = %target.server_name, "Session awaiting authorization");
                Ok(ConnectResponse {
                    session_id,
                    connection_status: ConnectionStatus::Authenticating,
                    requires_auth: true,
                    authorization_url: Some(authorization_url),
                })
            }
        }
    }

    /// Handle the browser's return from the authorization server.
    ///
    /// Always produces a redirect; failures become `step=error`.
    pub async fn handle_callback(&self, params: CallbackParams) -> OAuthRedirect {
        let correlation = params.state.as_deref().map(CorrelationState::decode);
        let server = correlation.as_ref().and_then(|c| c.server_name.clone());

        if let Some(error) = params.error {
            let message = params.error_description.unwrap_or(error);
            warn!(server = ?server, error = %message, "Authorization server returned an error");
            return OAuthRedirect::failure(message, server);
        }

        let (Some(code), Some(state)) = (params.code, params.state) else {
            return OAuthRedirect::failure("Missing code or state", server);
        };

        match self.complete_oauth(&code, &state).await {
            Ok(redirect) => redirect,
            Err(e) => {
                warn!(server = ?server, error = %e, "OAuth callback failed");
                OAuthRedirect::failure(e.to_string(), server)
            }
        }
    }

    /// Finish the authorization of the session named by `state`.
    pub async fn complete_oauth(&self, code: &str, state: &str) -> SessionResult<OAuthRedirect> {
        let correlation = CorrelationState::decode(state);
        let session_id = correlation.session_id;

        let slot = self
            .store
            .get_client(&session_id)
            .await
            .ok_or_else(|| SessionError::InvalidSession("Invalid or expired session".to_string()))?;

        // The guard serializes callbacks for one session: the status check,
        // the exchange and the persisted result happen as one step.
        let client = slot
            .lock()
            .await
            .ok_or_else(|| SessionError::InvalidSession("Invalid or expired session".to_string()))?;
        let record = self
            .store
            .get_record(&session_id)
            .await?
            .ok_or_else(|| SessionError::InvalidSession("Invalid or expired session".to_string()))?;
        let server = correlation
            .server_name
            .unwrap_or_else(|| record.server_name.clone());
        if !record.awaiting_authorization() {
            warn!(session_id = %session_id, "Callback for a session not awaiting authorization");
            return Err(SessionError::InvalidSession(
                "Session is not awaiting authorization".to_string(),
            ));
        }

        if let Err(e) = client.finish_auth(code).await {
            let abandoned = client.tokens().await.is_none();
            drop(client);
            if abandoned {
                self.store.remove_session(&session_id).await?;
            }
            return Err(SessionError::from_mcp(e, &session_id, Phase::Authorize));
        }

        self.store
            .update_tokens(&session_id, client.tokens().await)
            .await?;
        self.store
            .mark_active(&session_id, ConnectionStatus::Connected)
            .await?;
        drop(client);
        self.store
            .set_server_session(&record.server_name, &session_id)
            .await?;

        info!(session_id = %session_id, server = %server, "Session authorized");
        Ok(OAuthRedirect::success(session_id, server))
    }

    /// List the tools of one of the user's sessions.
    pub async fn list_tools(&self, user_id: &str, session_id: &str) -> SessionResult<Vec<McpTool>> {
        let slot = self.live_session(user_id, session_id).await?;
        let result = {
            let client = slot
                .lock()
                .await
                .ok_or_else(|| SessionError::not_found(session_id))?;
            self.ensure_tokens(&client, session_id).await?;
            client.list_tools().await
        };
        self.finish_call(session_id, result, Phase::Discover).await
    }

    /// Invoke a tool on one of the user's sessions.
    pub async fn call_tool(
        &self,
        user_id: &str,
        session_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> SessionResult<ToolCallResult> {
        let slot = self.live_session(user_id, session_id).await?;
        let result = {
            let client = slot
                .lock()
                .await
                .ok_or_else(|| SessionError::not_found(session_id))?;
            self.ensure_tokens(&client, session_id).await?;
            client.call_tool(tool_name, arguments).await
        };
        self.finish_call(session_id, result, Phase::ToolCall).await
    }

    /// Tear down one of the user's sessions. `false` when it does not exist.
    pub async fn disconnect(&self, user_id: &str, session_id: &str) -> SessionResult<bool> {
        match self.store.get_record(session_id).await? {
            Some(record) if record.user_id != user_id => Ok(false),
            _ => self.store.remove_session(session_id).await,
        }
    }

    pub async fn list_sessions(&self, user_id: &str) -> SessionResult<Vec<SessionSummary>> {
        self.store.get_user_sessions_data(user_id).await
    }

    pub async fn get_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> SessionResult<SessionSummary> {
        Ok(self.owned_record(user_id, session_id).await?.summary())
    }

    /// URL and transport of a session's server, as stored on the session.
    pub async fn server_config(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> SessionResult<ServerConfigView> {
        let record = self.owned_record(user_id, session_id).await?;
        Ok(ServerConfigView {
            url: record.server_url,
            transport: record.transport,
        })
    }

    async fn owned_record(&self, user_id: &str, session_id: &str) -> SessionResult<SessionRecord> {
        self.store
            .get_record(session_id)
            .await?
            .filter(|record| record.user_id == user_id)
            .ok_or_else(|| SessionError::not_found(session_id))
    }

    async fn live_session(&self, user_id: &str, session_id: &str) -> SessionResult<SessionHandle> {
        let record = self.owned_record(user_id, session_id).await?;

        if record.connection_status == ConnectionStatus::Authenticating {
            return Err(SessionError::AuthorizationRequired {
                id: session_id.to_string(),
            });
        }

        match self.store.get_client(session_id).await {
            Some(slot) if record.active => Ok(slot),
            // Known session without a usable client here: the caller must
            // reconnect.
            _ => Err(SessionError::SessionExpired {
                id: session_id.to_string(),
                message: "Session is not live on this server".to_string(),
            }),
        }
    }

    async fn ensure_tokens(
        &self,
        client: &McpSessionClient,
        session_id: &str,
    ) -> SessionResult<()> {
        match client.get_valid_tokens().await {
            TokenStatus::Valid | TokenStatus::Missing => Ok(()),
            TokenStatus::Refreshed => {
                self.store
                    .update_tokens(session_id, client.tokens().await)
                    .await?;
                Ok(())
            }
            TokenStatus::RefreshFailed(reason) => {
                self.store.update_tokens(session_id, None).await?;
                self.store
                    .mark_active(session_id, ConnectionStatus::Authenticating)
                    .await?;
                Err(SessionError::TokenRefreshFailed(reason))
            }
        }
    }

    async fn finish_call<T>(
        &self,
        session_id: &str,
        result: mcplink_mcp::McpResult<T>,
        phase: Phase,
    ) -> SessionResult<T> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(e) => SessionError::from_mcp(e, session_id, phase),
        };

        if matches!(err, SessionError::SessionExpired { .. }) {
            info!(session_id = %session_id, "Remote session expired, removing");
            self.store.remove_session(session_id).await?;
        }
        Err(err)
    }
}
