//! Streamable HTTP transport for remote MCP servers.
//!
//! - HTTP POST for sending requests
//! - the reply is either a JSON body or an SSE stream carrying the response
//!
//! The protocol session id handed out by the server (`mcp-session-id`, or
//! `x-session-id` on older servers) is echoed on every later request.

use crate::error::{is_session_invalid_message, McpError, McpResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Header carrying the protocol session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

const LEGACY_SESSION_HEADER: &str = "x-session-id";

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// The server URL (e.g., `https://mcp.example.com/mcp`)
    pub url: String,
    /// Optional bearer token
    pub auth_token: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            timeout_secs: 60,
        }
    }
}

/// HTTP transport for remote MCP servers.
pub struct HttpTransport {
    url: String,
    client: Client,
    auth_token: RwLock<Option<String>>,
    connected: AtomicBool,
    /// Protocol session id from the server.
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new(config: HttpTransportConfig) -> McpResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                McpError::connection_failed(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            url: config.url,
            client,
            auth_token: RwLock::new(config.auth_token),
            connected: AtomicBool::new(false),
            session_id: RwLock::new(None),
        })
    }

    /// The protocol session id currently in use, if any.
    pub async fn protocol_session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Build request with common headers.
    async fn build_request(&self, body: String) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body);

        if let Some(token) = self.auth_token.read().await.as_ref() {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(session_id) = self.session_id.read().await.as_ref() {
            req = req.header(SESSION_HEADER, session_id.as_str());
        }

        req
    }

    async fn capture_session_id(&self, response: &reqwest::Response) {
        let header = response
            .headers()
            .get(SESSION_HEADER)
            .or_else(|| response.headers().get(LEGACY_SESSION_HEADER));
        if let Some(id) = header.and_then(|v| v.to_str().ok()) {
            *self.session_id.write().await = Some(id.to_string());
        }
    }

    /// Map a non-success status to an error.
    async fn status_error(&self, status: StatusCode, body: String) -> McpError {
        if status == StatusCode::UNAUTHORIZED {
            return McpError::AuthRequired;
        }

        // A 404 against an established session means the server dropped it.
        let had_session = self.session_id.read().await.is_some();
        if (status == StatusCode::NOT_FOUND && had_session) || is_session_invalid_message(&body) {
            *self.session_id.write().await = None;
            return McpError::session_expired(if body.is_empty() {
                format!("Server returned {status}")
            } else {
                body
            });
        }

        McpError::protocol_error(format!("Server returned {status}: {body}"))
    }

    /// Parse the response body.
    async fn parse_response(&self, response: reqwest::Response) -> McpResult<JsonRpcResponse> {
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.status_error(status, text).await);
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if content_type.contains("text/event-stream") {
            parse_sse_stream(response).await
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| McpError::protocol_error(format!("Failed to read response: {e}")))?;

            serde_json::from_str(&text)
                .map_err(|e| McpError::protocol_error(format!("Invalid JSON response: {e}")))
        }
    }
}

/// Read an SSE stream until the first `data:` line holding a JSON-RPC response.
async fn parse_sse_stream(response: reqwest::Response) -> McpResult<JsonRpcResponse> {
    use futures::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk_result) = stream.next().await {
        let chunk =
            chunk_result.map_err(|e| McpError::protocol_error(format!("Stream error: {e}")))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline).collect();
            if let Some(response) = parse_sse_line(line.trim_end_matches(['\r', '\n'])) {
                return Ok(response);
            }
        }
    }

    // The final line may arrive without a trailing newline.
    if let Some(response) = parse_sse_line(buffer.trim_end()) {
        return Ok(response);
    }

    Err(McpError::protocol_error(
        "SSE stream ended without response",
    ))
}

fn parse_sse_line(line: &str) -> Option<JsonRpcResponse> {
    let data = line.strip_prefix("data:")?.trim_start();
    serde_json::from_str::<JsonRpcResponse>(data).ok()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let request_json = serde_json::to_string(&request)?;

        debug!(id = request.id, method = %request.method, "Sending MCP request");

        let response = self
            .build_request(request_json)
            .await
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    McpError::Timeout
                } else if e.is_connect() {
                    McpError::connection_failed(format!("Connection failed: {e}"))
                } else {
                    McpError::protocol_error(format!("Request failed: {e}"))
                }
            })?;

        self.capture_session_id(&response).await;
        let parsed = self.parse_response(response).await;
        if parsed.is_ok() {
            self.connected.store(true, Ordering::SeqCst);
        }
        parsed
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        let notification_json = serde_json::to_string(&notification)?;

        debug!(method = %notification.method, "Sending MCP notification");

        let response = self
            .build_request(notification_json)
            .await
            .send()
            .await
            .map_err(|e| McpError::connection_failed(format!("Notification failed: {e}")))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Notification returned non-success status");
        }

        Ok(())
    }

    async fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write().await = token;
    }

    async fn close(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);

        // Ask the server to drop the protocol session; best effort.
        if let Some(session_id) = self.session_id.write().await.take() {
            let mut req = self.client.delete(&self.url).header(SESSION_HEADER, session_id);
            if let Some(token) = self.auth_token.read().await.as_ref() {
                req = req.header("Authorization", format!("Bearer {token}"));
            }
            if let Err(e) = req.send().await {
                debug!(error = %e, "Session termination request failed");
            }
        }

        debug!(url = %self.url, "Closed MCP transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
