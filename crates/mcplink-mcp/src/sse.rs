//! SSE (Server-Sent Events) transport for legacy remote MCP servers.
//!
//! The client opens a long-lived GET stream. The server's first `endpoint`
//! event names the URL that requests are POSTed to; responses come back as
//! `message` events on the stream and are matched to requests by id. The
//! protocol session lives as long as the stream.

use crate::error::{is_session_invalid_message, McpError, McpResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// SSE transport configuration.
#[derive(Debug, Clone)]
pub struct SseConfig {
    /// The stream URL (e.g., `https://mcp.example.com/sse`)
    pub url: String,
    /// Optional bearer token
    pub auth_token: Option<String>,
    /// Request timeout in seconds. The stream itself has no timeout.
    pub timeout_secs: u64,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            timeout_secs: 60,
        }
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

#[derive(Default)]
struct StreamState {
    endpoint: Option<String>,
    reader: Option<JoinHandle<()>>,
}

/// SSE transport for legacy remote MCP servers.
pub struct SseTransport {
    url: String,
    client: Client,
    timeout: Duration,
    auth_token: RwLock<Option<String>>,
    stream: tokio::sync::Mutex<StreamState>,
    pending: Pending,
    connected: Arc<AtomicBool>,
}

impl SseTransport {
    /// Create a new SSE transport. Nothing is sent until the first request.
    pub fn new(config: SseConfig) -> McpResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                McpError::connection_failed(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            url: config.url,
            client,
            timeout,
            auth_token: RwLock::new(config.auth_token),
            stream: tokio::sync::Mutex::new(StreamState::default()),
            pending: Arc::default(),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The URL requests are posted to, once the stream is open.
    pub async fn endpoint(&self) -> Option<String> {
        self.stream.lock().await.endpoint.clone()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<JsonRpcResponse>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn bearer(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token.read().await.as_ref() {
            Some(token) => req.header("Authorization", format!("Bearer {token}")),
            None => req,
        }
    }

    /// The POST endpoint of the open stream, opening one if needed.
    async fn ensure_stream(&self) -> McpResult<String> {
        let mut state = self.stream.lock().await;
        if self.connected.load(Ordering::SeqCst) {
            if let Some(endpoint) = &state.endpoint {
                return Ok(endpoint.clone());
            }
        }

        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        state.endpoint = None;

        let (endpoint, reader) = self.open_stream().await?;
        state.endpoint = Some(endpoint.clone());
        state.reader = Some(reader);
        Ok(endpoint)
    }

    async fn open_stream(&self) -> McpResult<(String, JoinHandle<()>)> {
        debug!(url = %self.url, "Opening SSE stream");
        let req = self
            .client
            .get(&self.url)
            .header("Accept", "text/event-stream");
        let response = self.bearer(req).await.send().await.map_err(send_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::protocol_error(format!(
                "Server returned {status}: {text}"
            )));
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut parser = EventParser::default();
        let endpoint = tokio::time::timeout(
            self.timeout,
            self.read_endpoint(&mut stream, &mut parser),
        )
        .await
        .map_err(|_| McpError::Timeout)??;

        debug!(endpoint = %endpoint, "SSE stream open");
        self.connected.store(true, Ordering::SeqCst);
        let reader = tokio::spawn(read_events(
            stream,
            parser,
            self.pending.clone(),
            self.connected.clone(),
        ));
        Ok((endpoint, reader))
    }

    /// Read the stream up to the `endpoint` event. Answers arriving in the
    /// same chunks are dispatched.
    async fn read_endpoint<St, B>(
        &self,
        stream: &mut St,
        parser: &mut EventParser,
    ) -> McpResult<String>
    where
        St: Stream<Item = reqwest::Result<B>> + Unpin,
        B: AsRef<[u8]>,
    {
        loop {
            let Some(chunk) = stream.next().await else {
                return Err(McpError::connection_failed(
                    "SSE stream closed before the endpoint event",
                ));
            };
            let chunk =
                chunk.map_err(|e| McpError::connection_failed(format!("Stream error: {e}")))?;

            let mut endpoint = None;
            for event in parser.push(chunk.as_ref()) {
                if event.event == "endpoint" {
                    endpoint = Some(self.resolve_endpoint(&event.data)?);
                } else {
                    dispatch(&self.pending, &event);
                }
            }
            if let Some(endpoint) = endpoint {
                return Ok(endpoint);
            }
        }
    }

    fn resolve_endpoint(&self, data: &str) -> McpResult<String> {
        let base = url::Url::parse(&self.url)
            .map_err(|e| McpError::protocol_error(format!("Invalid server URL: {e}")))?;
        base.join(data.trim())
            .map(String::from)
            .map_err(|e| McpError::protocol_error(format!("Invalid endpoint {data:?}: {e}")))
    }

    async fn post(&self, endpoint: &str, body: String) -> McpResult<reqwest::Response> {
        let req = self
            .client
            .post(endpoint)
            .timeout(self.timeout)
            .header("Content-Type", "application/json")
            .body(body);
        let response = self.bearer(req).await.send().await.map_err(send_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired);
        }
        // The endpoint is bound to the stream's session.
        if status == StatusCode::NOT_FOUND || is_session_invalid_message(&text) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(McpError::session_expired(if text.is_empty() {
                format!("Server returned {status}")
            } else {
                text
            }));
        }
        Err(McpError::protocol_error(format!(
            "Server returned {status}: {text}"
        )))
    }

    async fn send_and_wait(
        &self,
        id: u64,
        body: String,
        reply: oneshot::Receiver<JsonRpcResponse>,
    ) -> McpResult<JsonRpcResponse> {
        let endpoint = self.ensure_stream().await?;
        let response = self.post(&endpoint, body).await?;

        // Some servers answer on the POST instead of the stream.
        let is_json = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        if is_json {
            let text = response.text().await.unwrap_or_default();
            if let Ok(direct) = serde_json::from_str::<JsonRpcResponse>(&text) {
                if direct.id == id {
                    return Ok(direct);
                }
            }
        }

        match tokio::time::timeout(self.timeout, reply).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(McpError::session_expired("SSE stream closed")),
            Err(_) => Err(McpError::Timeout),
        }
    }
}

fn send_error(e: reqwest::Error) -> McpError {
    if e.is_timeout() {
        McpError::Timeout
    } else if e.is_connect() {
        McpError::connection_failed(format!("Connection failed: {e}"))
    } else {
        McpError::protocol_error(format!("Request failed: {e}"))
    }
}

/// Hand a `message` event to the request waiting for it.
fn dispatch(pending: &Pending, event: &SseEvent) {
    if event.event != "message" {
        return;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&event.data) else {
        debug!("Ignoring malformed SSE message");
        return;
    };
    // Server-initiated requests and notifications are not answers.
    if value.get("method").is_some() {
        return;
    }
    let Ok(response) = serde_json::from_value::<JsonRpcResponse>(value) else {
        return;
    };

    let waiter = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&response.id);
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(response);
        }
        None => debug!(id = response.id, "Response for unknown request"),
    }
}

async fn read_events<St, B>(
    mut stream: St,
    mut parser: EventParser,
    pending: Pending,
    connected: Arc<AtomicBool>,
) where
    St: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                for event in parser.push(chunk.as_ref()) {
                    dispatch(&pending, &event);
                }
            }
            Err(e) => {
                warn!(error = %e, "SSE stream failed");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    // Dropping the senders fails every request still waiting.
    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    debug!("SSE stream closed");
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Incremental parser for the `text/event-stream` format.
#[derive(Debug, Default)]
struct EventParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl EventParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                let event = self.event.take();
                if !self.data.is_empty() {
                    events.push(SseEvent {
                        event: event.unwrap_or_else(|| "message".to_string()),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        events
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let id = request.id;
        let body = serde_json::to_string(&request)?;
        debug!(id, method = %request.method, "Sending SSE request");

        // Registered before the stream opens so an early answer is kept.
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);
        let result = self.send_and_wait(id, body, rx).await;
        self.pending().remove(&id);
        result
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        let body = serde_json::to_string(&notification)?;
        debug!(method = %notification.method, "Sending SSE notification");

        let endpoint = self.ensure_stream().await?;
        self.post(&endpoint, body).await?;
        Ok(())
    }

    async fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write().await = token;
    }

    async fn close(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        let mut state = self.stream.lock().await;
        state.endpoint = None;
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        self.pending().clear();

        debug!(url = %self.url, "Closed SSE transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server: &MockServer) -> SseTransport {
        SseTransport::new(SseConfig {
            url: format!("{}/sse", server.uri()),
            auth_token: None,
            timeout_secs: 5,
        })
        .unwrap()
    }

    async fn mount_stream(server: &MockServer, body: &str) {
        Mock::given(method("GET"))
            .and(path("/sse"))
            .and(header("accept", "text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(server)
            .await;
    }

    #[test]
    fn test_parser_splits_events_across_chunks() {
        let mut parser = EventParser::default();
        assert!(parser.push(b"event: endpoint\nda").is_empty());
        let events = parser.push(b"ta: /messages?sessionId=abc\n\n: ping\n\ndata: {}\r\n\r\n");

        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "endpoint".to_string(),
                    data: "/messages?sessionId=abc".to_string(),
                },
                SseEvent {
                    event: "message".to_string(),
                    data: "{}".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parser_joins_multiline_data() {
        let mut parser = EventParser::default();
        let events = parser.push(b"event: message\ndata: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }

    #[tokio::test]
    async fn test_request_answered_on_stream() {
        let server = MockServer::start().await;
        mount_stream(
            &server,
            "event: endpoint\ndata: /messages?sessionId=abc\n\n\
             event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[]}}\n\n",
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(query_param("sessionId", "abc"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let response = transport
            .request(JsonRpcRequest::new(1, "tools/list", None))
            .await
            .unwrap();

        assert_eq!(response.id, 1);
        assert_eq!(
            transport.endpoint().await,
            Some(format!("{}/messages?sessionId=abc", server.uri()))
        );
    }

    #[tokio::test]
    async fn test_request_answered_on_post() {
        let server = MockServer::start().await;
        mount_stream(&server, "event: endpoint\ndata: /messages\n\n").await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"jsonrpc": "2.0", "id": 4, "result": {}}),
            ))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        transport.set_auth_token(Some("tok-1".to_string())).await;
        let response = transport
            .request(JsonRpcRequest::new(4, "initialize", None))
            .await
            .unwrap();
        assert_eq!(response.id, 4);
    }

    #[tokio::test]
    async fn test_unauthorized_stream_maps_to_auth_required() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let err = transport
            .request(JsonRpcRequest::new(1, "initialize", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::AuthRequired));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_unknown_endpoint_session_is_expired() {
        let server = MockServer::start().await;
        mount_stream(&server, "event: endpoint\ndata: /messages\n\n").await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Invalid session"))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let err = transport
            .request(JsonRpcRequest::new(1, "tools/call", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::SessionExpired(ref m) if m == "Invalid session"));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_stream_closing_fails_waiting_request() {
        let server = MockServer::start().await;
        mount_stream(&server, "event: endpoint\ndata: /messages\n\n").await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let err = transport
            .request(JsonRpcRequest::new(1, "tools/list", None))
            .await
            .unwrap_err();
        assert!(err.is_session_invalid());
    }

    #[tokio::test]
    async fn test_stream_without_endpoint_fails() {
        let server = MockServer::start().await;
        mount_stream(&server, ": keep-alive\n\n").await;

        let transport = transport_for(&server);
        let err = transport
            .request(JsonRpcRequest::new(1, "initialize", None))
            .await
            .unwrap_err();
        assert!(err.is_transport_failure());
    }

    #[tokio::test]
    async fn test_close_forgets_endpoint() {
        let server = MockServer::start().await;
        mount_stream(&server, "event: endpoint\ndata: /messages\n\n").await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        transport
            .notify(JsonRpcNotification::new("notifications/initialized", None))
            .await
            .unwrap();
        assert!(transport.endpoint().await.is_some());

        transport.close().await.unwrap();
        assert!(transport.endpoint().await.is_none());
        assert!(!transport.is_connected());
    }
}
