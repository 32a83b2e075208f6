//! Scripted stand-ins for a remote tool server, its authorization server,
//! the session service and the backend API.

use async_trait::async_trait;
use mcplink_client::{
    ActivationResult, BackendApi, BackendError, GatewayError, GatewayResult, SessionGateway,
};
use mcplink_core::{
    ClientFactory, ConnectResponse, ConnectionStatus, ServerTarget, SessionRecord, SessionResult,
    SessionSummary,
};
use mcplink_mcp::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use mcplink_mcp::{
    AuthServerMetadata, AuthorizationServer, ClientInfo, McpError, McpResult, McpSessionClient,
    McpTool, OAuthConfig, OAuthTokens, RegistrationRequest, SessionClientConfig, ToolCallResult,
    Transport,
};
use mcplink_storage::{MemoryStorage, Storage, StorageResult};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A mock MCP transport.
///
/// Answers `initialize`, `tools/list` and `tools/call` from configured data
/// and records every request. Clones share state, so a test can keep one
/// handle and give another to the code under test.
///
/// # Example
///
/// ```rust
/// use mcplink_test_utils::mocks::MockTransport;
///
/// let transport = MockTransport::new().with_tools(&["search", "create_issue"]);
/// assert_eq!(transport.request_count("tools/list"), 0);
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<TransportState>>,
}

#[derive(Default)]
struct TransportState {
    tools: Vec<McpTool>,
    require_auth: bool,
    auth_token: Option<String>,
    failures: VecDeque<McpError>,
    session_expired: bool,
    delay: Option<Duration>,
    requests: Vec<JsonRpcRequest>,
    notifications: Vec<String>,
    connected: bool,
    close_count: usize,
}

impl MockTransport {
    /// Create a transport for a server with no tools and no auth.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve these tools.
    pub fn with_tools(self, names: &[&str]) -> Self {
        self.inner.lock().unwrap().tools = names.iter().map(|n| McpTool::named(*n)).collect();
        self
    }

    /// Answer 401 to any request sent without a bearer token.
    pub fn requiring_auth(self) -> Self {
        self.inner.lock().unwrap().require_auth = true;
        self
    }

    /// Delay every request.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().delay = Some(delay);
        self
    }

    /// Fail the next request with `error`. Queued failures apply in order.
    pub fn fail_next(&self, error: McpError) {
        self.inner.lock().unwrap().failures.push_back(error);
    }

    /// Make `tools/*` requests fail as if the server dropped the session.
    pub fn set_session_expired(&self, expired: bool) {
        self.inner.lock().unwrap().session_expired = expired;
    }

    /// Methods of all recorded requests, in order.
    pub fn requests(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .requests
            .iter()
            .map(|r| r.method.clone())
            .collect()
    }

    /// Number of requests with the given method.
    pub fn request_count(&self, method: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    /// Names of tools called, in order.
    pub fn called_tools(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.method == "tools/call")
            .filter_map(|r| r.params.as_ref()?.get("name")?.as_str().map(String::from))
            .collect()
    }

    /// Recorded notification methods.
    pub fn notifications(&self) -> Vec<String> {
        self.inner.lock().unwrap().notifications.clone()
    }

    /// Bearer token currently set.
    pub fn auth_token(&self) -> Option<String> {
        self.inner.lock().unwrap().auth_token.clone()
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.inner.lock().unwrap().close_count
    }

    fn respond(state: &mut TransportState, request: &JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if state.require_auth && state.auth_token.is_none() {
            return Err(McpError::AuthRequired);
        }

        let id = request.id;
        match request.method.as_str() {
            "initialize" => Ok(JsonRpcResponse::success(
                id,
                serde_json::json!({
                    "protocolVersion": mcplink_mcp::protocol::PROTOCOL_VERSION,
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": "mock", "version": "1.0.0"}
                }),
            )),
            "tools/list" | "tools/call" if state.session_expired => {
                Err(McpError::session_expired("Invalid session"))
            }
            "tools/list" => Ok(JsonRpcResponse::success(
                id,
                serde_json::json!({ "tools": state.tools }),
            )),
            "tools/call" => {
                let params = request.params.clone().unwrap_or_default();
                let name = params
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string();
                if !state.tools.iter().any(|t| t.name == name) {
                    return Ok(JsonRpcResponse::failure(
                        id,
                        -32602,
                        format!("Unknown tool: {name}"),
                    ));
                }
                let arguments = params.get("arguments").cloned().unwrap_or_default();
                let result = ToolCallResult::text(format!("{name}:{arguments}"));
                Ok(JsonRpcResponse::success(
                    id,
                    serde_json::to_value(result).unwrap(),
                ))
            }
            other => Ok(JsonRpcResponse::failure(
                id,
                -32601,
                format!("Method not found: {other}"),
            )),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let delay = {
            let mut state = self.inner.lock().unwrap();
            state.requests.push(request.clone());
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.lock().unwrap();
        let response = Self::respond(&mut state, &request);
        if response.is_ok() {
            state.connected = true;
        }
        response
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        self.inner
            .lock()
            .unwrap()
            .notifications
            .push(notification.method);
        Ok(())
    }

    async fn set_auth_token(&self, token: Option<String>) {
        self.inner.lock().unwrap().auth_token = token;
    }

    async fn close(&self) -> McpResult<()> {
        let mut state = self.inner.lock().unwrap();
        state.connected = false;
        state.close_count += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }
}

/// Base URL of the mock authorization server.
pub const MOCK_AUTH_BASE: &str = "https://auth.mock.test";

/// A mock authorization server.
///
/// Issues `mock-access-<n>` access tokens and records exchanged codes,
/// registrations and refreshes.
#[derive(Clone)]
pub struct MockAuthorizationServer {
    inner: Arc<Mutex<AuthState>>,
}

struct AuthState {
    expires_in: Option<u64>,
    issue_refresh_token: bool,
    fail_exchange: bool,
    fail_refresh: bool,
    issued: usize,
    exchanged_codes: Vec<String>,
    verifiers: Vec<String>,
    registrations: usize,
    refreshes: usize,
}

impl Default for MockAuthorizationServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuthorizationServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(AuthState {
                expires_in: Some(3600),
                issue_refresh_token: true,
                fail_exchange: false,
                fail_refresh: false,
                issued: 0,
                exchanged_codes: Vec::new(),
                verifiers: Vec::new(),
                registrations: 0,
                refreshes: 0,
            })),
        }
    }

    /// Lifetime of issued access tokens (`None` for non-expiring).
    pub fn with_expires_in(self, expires_in: Option<u64>) -> Self {
        self.inner.lock().unwrap().expires_in = expires_in;
        self
    }

    /// Do not hand out refresh tokens.
    pub fn without_refresh_tokens(self) -> Self {
        self.inner.lock().unwrap().issue_refresh_token = false;
        self
    }

    /// Reject code exchanges.
    pub fn set_fail_exchange(&self, fail: bool) {
        self.inner.lock().unwrap().fail_exchange = fail;
    }

    /// Reject refreshes.
    pub fn set_fail_refresh(&self, fail: bool) {
        self.inner.lock().unwrap().fail_refresh = fail;
    }

    /// Codes exchanged so far.
    pub fn exchanged_codes(&self) -> Vec<String> {
        self.inner.lock().unwrap().exchanged_codes.clone()
    }

    /// PKCE verifiers presented with exchanges.
    pub fn verifiers(&self) -> Vec<String> {
        self.inner.lock().unwrap().verifiers.clone()
    }

    pub fn registration_count(&self) -> usize {
        self.inner.lock().unwrap().registrations
    }

    pub fn refresh_count(&self) -> usize {
        self.inner.lock().unwrap().refreshes
    }

    fn issue(state: &mut AuthState) -> OAuthTokens {
        state.issued += 1;
        OAuthTokens {
            access_token: format!("mock-access-{}", state.issued),
            token_type: "Bearer".to_string(),
            refresh_token: state
                .issue_refresh_token
                .then(|| format!("mock-refresh-{}", state.issued)),
            expires_in: state.expires_in,
            scope: None,
        }
    }
}

#[async_trait]
impl AuthorizationServer for MockAuthorizationServer {
    async fn metadata(&self, _server_url: &str) -> McpResult<AuthServerMetadata> {
        Ok(AuthServerMetadata {
            issuer: Some(MOCK_AUTH_BASE.to_string()),
            authorization_endpoint: format!("{MOCK_AUTH_BASE}/authorize"),
            token_endpoint: format!("{MOCK_AUTH_BASE}/token"),
            registration_endpoint: Some(format!("{MOCK_AUTH_BASE}/register")),
            scopes_supported: None,
        })
    }

    async fn register(
        &self,
        _metadata: &AuthServerMetadata,
        request: &RegistrationRequest,
    ) -> McpResult<ClientInfo> {
        let mut state = self.inner.lock().unwrap();
        state.registrations += 1;
        Ok(ClientInfo {
            client_id: format!("mock-client-{}", request.client_name),
            client_secret: None,
            client_id_issued_at: None,
            client_secret_expires_at: None,
        })
    }

    async fn exchange_code(
        &self,
        _metadata: &AuthServerMetadata,
        _client: &ClientInfo,
        code: &str,
        _redirect_uri: &str,
        code_verifier: &str,
    ) -> McpResult<OAuthTokens> {
        let mut state = self.inner.lock().unwrap();
        state.exchanged_codes.push(code.to_string());
        state.verifiers.push(code_verifier.to_string());
        if state.fail_exchange {
            return Err(McpError::auth_failed("invalid_grant"));
        }
        Ok(Self::issue(&mut state))
    }

    async fn refresh(
        &self,
        _metadata: &AuthServerMetadata,
        _client: &ClientInfo,
        _refresh_token: &str,
    ) -> McpResult<OAuthTokens> {
        let mut state = self.inner.lock().unwrap();
        state.refreshes += 1;
        if state.fail_refresh {
            return Err(McpError::TokenRefreshFailed("invalid_grant".to_string()));
        }
        Ok(Self::issue(&mut state))
    }
}

/// A `ClientFactory` that wires every new session to mock servers.
///
/// Sessions share the default transport unless a server name has its own
/// transport registered with `with_server`.
#[derive(Clone, Default)]
pub struct MockClientFactory {
    transport: MockTransport,
    servers: Arc<Mutex<HashMap<String, MockTransport>>>,
    auth: MockAuthorizationServer,
    created: Arc<Mutex<Vec<String>>>,
}

impl MockClientFactory {
    pub fn new(transport: MockTransport, auth: MockAuthorizationServer) -> Self {
        Self {
            transport,
            servers: Arc::default(),
            auth,
            created: Arc::default(),
        }
    }

    /// Use `transport` for sessions against `server_name`.
    pub fn with_server(self, server_name: &str, transport: MockTransport) -> Self {
        self.servers
            .lock()
            .unwrap()
            .insert(server_name.to_string(), transport);
        self
    }

    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }

    pub fn auth(&self) -> &MockAuthorizationServer {
        &self.auth
    }

    /// Ids of the sessions created so far, in order.
    pub fn created_sessions(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }
}

impl ClientFactory for MockClientFactory {
    fn create(&self, session_id: &str, target: &ServerTarget) -> SessionResult<McpSessionClient> {
        self.created.lock().unwrap().push(session_id.to_string());
        let transport = self
            .servers
            .lock()
            .unwrap()
            .get(&target.server_name)
            .cloned()
            .unwrap_or_else(|| self.transport.clone());

        Ok(McpSessionClient::new(
            SessionClientConfig {
                session_id: session_id.to_string(),
                server_name: target.server_name.clone(),
                server_url: target.server_url.clone(),
                transport_kind: target.transport,
                oauth: OAuthConfig::default(),
            },
            Arc::new(transport),
            Arc::new(self.auth.clone()),
        ))
    }
}

/// A `SessionGateway` that keeps sessions in memory.
///
/// Session ids are `mock-session-1`, `mock-session-2` and so on. Every
/// operation is logged, so tests can assert on what reached the service.
#[derive(Clone, Default)]
pub struct MockGateway {
    inner: Arc<Mutex<GatewayState>>,
}

#[derive(Default)]
struct GatewayState {
    tools: Vec<McpTool>,
    require_auth: bool,
    open_delay: Option<Duration>,
    fail_open: Option<String>,
    fail_list_tools: Option<String>,
    expirations: usize,
    expire_as_result: bool,
    next_session: u64,
    sessions: HashMap<String, SessionRecord>,
    ops: Vec<String>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve these tools on every session.
    pub fn with_tools(self, names: &[&str]) -> Self {
        self.inner.lock().unwrap().tools = names.iter().map(|n| McpTool::named(*n)).collect();
        self
    }

    /// New sessions wait for `authorize`.
    pub fn requiring_auth(self) -> Self {
        self.inner.lock().unwrap().require_auth = true;
        self
    }

    /// Delay every `open`.
    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().open_delay = Some(delay);
        self
    }

    /// Fail every `open` as unreachable.
    pub fn fail_open(&self, message: &str) {
        self.inner.lock().unwrap().fail_open = Some(message.to_string());
    }

    /// Fail every `list_tools` as unreachable.
    pub fn fail_list_tools(&self, message: &str) {
        self.inner.lock().unwrap().fail_list_tools = Some(message.to_string());
    }

    /// Report the next `count` tool calls as session-expired errors.
    pub fn expire_next_calls(&self, count: usize) {
        let mut state = self.inner.lock().unwrap();
        state.expirations = count;
        state.expire_as_result = false;
    }

    /// Like `expire_next_calls`, but as tool results flagged `isError`
    /// that only say so in their text.
    pub fn expire_next_results(&self, count: usize) {
        let mut state = self.inner.lock().unwrap();
        state.expirations = count;
        state.expire_as_result = true;
    }

    /// Whether sessions opened from now on wait for `authorize`.
    pub fn set_require_auth(&self, require: bool) {
        self.inner.lock().unwrap().require_auth = require;
    }

    /// Put a session back into waiting for authorization, as the service
    /// does when a token refresh fails.
    pub fn revoke_authorization(&self, session_id: &str) {
        if let Some(record) = self.inner.lock().unwrap().sessions.get_mut(session_id) {
            record.active = false;
            record.connection_status = ConnectionStatus::Authenticating;
        }
    }

    /// Complete authorization for a session.
    pub fn authorize(&self, session_id: &str) {
        if let Some(record) = self.inner.lock().unwrap().sessions.get_mut(session_id) {
            record.active = true;
            record.connection_status = ConnectionStatus::Connected;
        }
    }

    /// Forget a session, as if the service evicted it.
    pub fn drop_session(&self, session_id: &str) {
        self.inner.lock().unwrap().sessions.remove(session_id);
    }

    /// Every operation so far, e.g. `open` or `call_tool:mock-session-1`.
    pub fn ops(&self) -> Vec<String> {
        self.inner.lock().unwrap().ops.clone()
    }

    /// Number of operations starting with `prefix`.
    pub fn op_count(&self, prefix: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }

    /// Ids of the sessions the service still holds.
    pub fn live_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().unwrap().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn usable_session(state: &GatewayState, session_id: &str) -> GatewayResult<()> {
        match state.sessions.get(session_id) {
            None => Err(GatewayError::SessionNotFound(format!(
                "Session not found: {session_id}"
            ))),
            Some(record) if !record.active => Err(GatewayError::AuthorizationRequired(format!(
                "Session {session_id} requires authorization"
            ))),
            Some(_) => Ok(()),
        }
    }
}

#[async_trait]
impl SessionGateway for MockGateway {
    async fn open(&self, target: &ServerTarget) -> GatewayResult<ConnectResponse> {
        let delay = self.inner.lock().unwrap().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.lock().unwrap();
        state.ops.push("open".to_string());
        if let Some(message) = state.fail_open.clone() {
            return Err(GatewayError::TransportUnavailable(message));
        }

        state.next_session += 1;
        let session_id = format!("mock-session-{}", state.next_session);
        let mut record = SessionRecord::new(session_id.clone(), "mock-user".to_string(), target);
        let requires_auth = state.require_auth;
        if requires_auth {
            record.connection_status = ConnectionStatus::Authenticating;
        } else {
            record.active = true;
            record.connection_status = ConnectionStatus::Connected;
        }
        let connection_status = record.connection_status;
        state.sessions.insert(session_id.clone(), record);

        Ok(ConnectResponse {
            authorization_url: requires_auth
                .then(|| format!("{MOCK_AUTH_BASE}/authorize?state={session_id}")),
            session_id,
            connection_status,
            requires_auth,
        })
    }

    async fn list_tools(&self, session_id: &str) -> GatewayResult<Vec<McpTool>> {
        let mut state = self.inner.lock().unwrap();
        state.ops.push("list_tools".to_string());
        if let Some(message) = state.fail_list_tools.clone() {
            return Err(GatewayError::TransportUnavailable(message));
        }
        Self::usable_session(&state, session_id)?;
        Ok(state.tools.clone())
    }

    async fn call_tool(
        &self,
        session_id: &str,
        tool_name: &str,
        _arguments: Value,
    ) -> GatewayResult<ToolCallResult> {
        let mut state = self.inner.lock().unwrap();
        state.ops.push(format!("call_tool:{session_id}"));

        if state.expirations > 0 {
            state.expirations -= 1;
            if state.expire_as_result {
                let mut result = ToolCallResult::text("Invalid session");
                result.is_error = true;
                return Ok(result);
            }
            return Err(GatewayError::SessionExpired(
                "Remote session expired".to_string(),
            ));
        }

        Self::usable_session(&state, session_id)?;
        if !state.tools.iter().any(|tool| tool.name == tool_name) {
            return Err(GatewayError::Remote {
                code: "TOOL_ERROR".to_string(),
                message: format!("Unknown tool: {tool_name}"),
            });
        }
        Ok(ToolCallResult::text(format!("{tool_name} ok")))
    }

    async fn disconnect(&self, session_id: &str) -> GatewayResult<bool> {
        let mut state = self.inner.lock().unwrap();
        state.ops.push("disconnect".to_string());
        Ok(state.sessions.remove(session_id).is_some())
    }

    async fn list_sessions(&self) -> GatewayResult<Vec<SessionSummary>> {
        let mut state = self.inner.lock().unwrap();
        state.ops.push("list_sessions".to_string());
        let mut sessions: Vec<SessionSummary> =
            state.sessions.values().map(SessionRecord::summary).collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(sessions)
    }
}

/// A `BackendApi` that records every call.
#[derive(Clone, Default)]
pub struct MockBackend {
    calls: Arc<Mutex<Vec<String>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call from now on.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    /// Calls so far, e.g. `set_enabled:github:true` or `restart:github`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(call);
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(BackendError(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BackendApi for MockBackend {
    async fn activate(&self, server_name: &str) -> Result<ActivationResult, BackendError> {
        self.record(format!("activate:{server_name}"))?;
        Ok(ActivationResult {
            connection_status: ConnectionStatus::Connected,
            tools: Vec::new(),
            requires_auth: false,
            authorization_url: None,
        })
    }

    async fn deactivate(&self, server_name: &str) -> Result<(), BackendError> {
        self.record(format!("deactivate:{server_name}"))
    }

    async fn restart(&self, server_name: &str) -> Result<(), BackendError> {
        self.record(format!("restart:{server_name}"))
    }

    async fn set_enabled(&self, server_name: &str, enabled: bool) -> Result<(), BackendError> {
        self.record(format!("set_enabled:{server_name}:{enabled}"))
    }
}

/// In-memory storage whose writes take `delay`, to widen race windows.
pub struct SlowStorage {
    inner: MemoryStorage,
    delay: Duration,
}

impl SlowStorage {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStorage::new(),
            delay,
        }
    }
}

#[async_trait]
impl Storage for SlowStorage {
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>> {
        self.inner.read(key).await
    }

    async fn write<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.write(key, value).await
    }

    async fn update<T, F>(&self, key: &[&str], editor: F) -> StorageResult<T>
    where
        T: DeserializeOwned + Serialize + Send + Sync + Default,
        F: FnOnce(&mut T) + Send,
    {
        tokio::time::sleep(self.delay).await;
        self.inner.update(key, editor).await
    }

    async fn remove(&self, key: &[&str]) -> StorageResult<()> {
        self.inner.remove(key).await
    }

    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>> {
        self.inner.list(prefix).await
    }

    async fn exists(&self, key: &[&str]) -> StorageResult<bool> {
        self.inner.exists(key).await
    }
}
