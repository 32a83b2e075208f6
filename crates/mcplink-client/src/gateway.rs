//! Access to the session service.
//!
//! The client runtime never owns protocol clients itself; it asks the session
//! service to open sessions and run calls on them, either over HTTP or
//! in-process.

use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use mcplink_core::{ConnectResponse, ServerTarget, SessionService, SessionSummary};
use mcplink_mcp::{McpTool, ToolCallResult};
use mcplink_storage::Storage;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Operations the client runtime needs from the session service.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    /// Open a session against a server.
    async fn open(&self, target: &ServerTarget) -> GatewayResult<ConnectResponse>;

    async fn list_tools(&self, session_id: &str) -> GatewayResult<Vec<McpTool>>;

    async fn call_tool(
        &self,
        session_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> GatewayResult<ToolCallResult>;

    /// Tear a session down. `false` when it was already gone.
    async fn disconnect(&self, session_id: &str) -> GatewayResult<bool>;

    async fn list_sessions(&self) -> GatewayResult<Vec<SessionSummary>>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct ToolsBody {
    tools: Vec<McpTool>,
}

#[derive(Debug, Deserialize)]
struct DisconnectBody {
    success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallBody<'a> {
    session_id: &'a str,
    tool_name: &'a str,
    tool_args: Value,
}

/// `SessionGateway` speaking to a remote mcplink server.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> GatewayResult<T> {
        let response = builder.send().await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(Self::error_from(response.status(), response.text().await.ok()))
        }
    }

    fn error_from(status: StatusCode, body: Option<String>) -> GatewayError {
        let body = body.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => GatewayError::from_code(&err.code, err.error),
            Err(_) if status == StatusCode::UNAUTHORIZED => GatewayError::Unauthorized(body),
            Err(_) => GatewayError::Remote {
                code: status.as_u16().to_string(),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            },
        }
    }
}

#[async_trait]
impl SessionGateway for HttpGateway {
    async fn open(&self, target: &ServerTarget) -> GatewayResult<ConnectResponse> {
        debug!(server = %target.server_name, "Opening session");
        self.send(self.request(Method::POST, "/api/mcp/connect").json(target))
            .await
    }

    async fn list_tools(&self, session_id: &str) -> GatewayResult<Vec<McpTool>> {
        let path = format!("/api/mcp/sessions/{session_id}/tools");
        let body: ToolsBody = self.send(self.request(Method::GET, &path)).await?;
        Ok(body.tools)
    }

    async fn call_tool(
        &self,
        session_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> GatewayResult<ToolCallResult> {
        let body = ToolCallBody {
            session_id,
            tool_name,
            tool_args: arguments,
        };
        self.send(self.request(Method::POST, "/api/mcp/tool-call").json(&body))
            .await
    }

    async fn disconnect(&self, session_id: &str) -> GatewayResult<bool> {
        let response = self
            .request(Method::POST, "/api/mcp/disconnect")
            .json(&serde_json::json!({ "sessionId": session_id }))
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await.ok();

        if let Some(body) = text
            .as_deref()
            .and_then(|t| serde_json::from_str::<DisconnectBody>(t).ok())
        {
            if status.is_success() || status == StatusCode::NOT_FOUND {
                return Ok(body.success);
            }
        }
        Err(Self::error_from(status, text))
    }

    async fn list_sessions(&self) -> GatewayResult<Vec<SessionSummary>> {
        self.send(self.request(Method::GET, "/api/mcp/sessions"))
            .await
    }
}

/// `SessionGateway` calling a `SessionService` in the same process.
pub struct LocalGateway<S: Storage> {
    service: SessionService<S>,
    user_id: String,
}

impl<S: Storage> LocalGateway<S> {
    pub fn new(service: SessionService<S>, user_id: impl Into<String>) -> Self {
        Self {
            service,
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl<S: Storage + 'static> SessionGateway for LocalGateway<S> {
    async fn open(&self, target: &ServerTarget) -> GatewayResult<ConnectResponse> {
        Ok(self.service.connect(&self.user_id, target.clone()).await?)
    }

    async fn list_tools(&self, session_id: &str) -> GatewayResult<Vec<McpTool>> {
        Ok(self.service.list_tools(&self.user_id, session_id).await?)
    }

    async fn call_tool(
        &self,
        session_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> GatewayResult<ToolCallResult> {
        Ok(self
            .service
            .call_tool(&self.user_id, session_id, tool_name, arguments)
            .await?)
    }

    async fn disconnect(&self, session_id: &str) -> GatewayResult<bool> {
        Ok(self.service.disconnect(&self.user_id, session_id).await?)
    }

    async fn list_sessions(&self) -> GatewayResult<Vec<SessionSummary>> {
        Ok(self.service.list_sessions(&self.user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcplink_core::ConnectionStatus;
    use mcplink_mcp::TransportKind;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target() -> ServerTarget {
        ServerTarget {
            server_id: "srv1".to_string(),
            server_name: "github".to_string(),
            server_url: "https://ex.com/mcp".to_string(),
            transport: TransportKind::StreamableHttp,
        }
    }

    #[tokio::test]
    async fn test_open_sends_target_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/mcp/connect"))
            .and(header("authorization", "Bearer tok-a"))
            .and(body_json(serde_json::json!({
                "serverId": "srv1",
                "serverName": "github",
                "serverUrl": "https://ex.com/mcp",
                "transport": "streamable_http"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sessionId": "mcs_1",
                "connectionStatus": "AUTHENTICATING",
                "requiresAuth": true,
                "authorizationUrl": "https://auth.ex.com/authorize?state=x"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(server.uri(), Some("tok-a".to_string())).unwrap();
        let response = gateway.open(&target()).await.unwrap();

        assert_eq!(response.session_id, "mcs_1");
        assert_eq!(response.connection_status, ConnectionStatus::Authenticating);
        assert!(response.requires_auth);
    }

    #[tokio::test]
    async fn test_error_codes_are_structured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/mcp/tool-call"))
            .respond_with(ResponseTemplate::new(410).set_body_json(serde_json::json!({
                "error": "Session expired: mcs_1",
                "code": "SESSION_EXPIRED"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/mcp/sessions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(server.uri(), None).unwrap();

        let err = gateway
            .call_tool("mcs_1", "search", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::SessionExpired(_)));
        assert!(err.is_session_invalid());
        assert_eq!(err.to_string(), "Session expired: mcs_1");

        let err = gateway.list_sessions().await.unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_call_and_list_tools() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/mcp/sessions/mcs_1/tools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tools": [{"name": "search"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/mcp/tool-call"))
            .and(body_json(serde_json::json!({
                "sessionId": "mcs_1",
                "toolName": "search",
                "toolArgs": {"q": "bug"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "found"}],
                "isError": false
            })))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(format!("{}/", server.uri()), None).unwrap();

        let tools = gateway.list_tools("mcs_1").await.unwrap();
        assert_eq!(tools, vec![McpTool::named("search")]);

        let result = gateway
            .call_tool("mcs_1", "search", serde_json::json!({"q": "bug"}))
            .await
            .unwrap();
        assert_eq!(result.text_content(), "found");
    }

    #[tokio::test]
    async fn test_disconnect_not_found_is_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/mcp/disconnect"))
            .and(body_json(serde_json::json!({"sessionId": "mcs_1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "message": "Session disconnected"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/mcp/disconnect"))
            .and(body_json(serde_json::json!({"sessionId": "mcs_2"})))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "success": false,
                "message": "Session not found"
            })))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(server.uri(), None).unwrap();
        assert!(gateway.disconnect("mcs_1").await.unwrap());
        assert!(!gateway.disconnect("mcs_2").await.unwrap());
    }
}
