//! HTTP routes for the server.

use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use mcplink_core::{
    CallbackParams, ConnectResponse, Credentials, ServerConfigView, ServerTarget, SessionError,
    SessionSummary,
};
use mcplink_mcp::{McpTool, ToolCallResult, OAUTH_CALLBACK_PATH};
use mcplink_storage::Storage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Header carrying the user id when header identity is trusted.
pub const USER_HEADER: &str = "x-user-id";

/// Create the router with all routes.
pub fn create_router<S: Storage + 'static>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        // ===================
        // Session endpoints
        // ===================
        .route("/api/mcp/connect", post(connect::<S>))
        .route("/api/mcp/sessions", get(list_sessions::<S>))
        .route("/api/mcp/sessions/{id}/tools", get(list_tools::<S>))
        .route("/api/mcp/tool-call", post(tool_call::<S>))
        .route("/api/mcp/disconnect", post(disconnect::<S>))
        .route("/api/mcp/server-config/{id}", get(server_config::<S>))
        // ===================
        // OAuth endpoints
        // ===================
        .route(OAUTH_CALLBACK_PATH, get(oauth_callback::<S>))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

type ApiFailure = (StatusCode, Json<ApiError>);

impl ApiError {
    fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }

    fn unauthorized() -> ApiFailure {
        (
            StatusCode::UNAUTHORIZED,
            Json(Self::new("Authentication required", "UNAUTHORIZED")),
        )
    }

    fn from_session(err: SessionError) -> ApiFailure {
        let status = match &err {
            SessionError::NotFound { .. } => StatusCode::NOT_FOUND,
            SessionError::InvalidSession(_) => StatusCode::BAD_REQUEST,
            SessionError::AuthorizationRequired { .. } | SessionError::TokenRefreshFailed(_) => {
                StatusCode::FORBIDDEN
            }
            SessionError::SessionExpired { .. } => StatusCode::GONE,
            SessionError::TransportUnavailable { .. } | SessionError::Mcp(_) => {
                StatusCode::BAD_GATEWAY
            }
            SessionError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::AlreadyExists { .. } => StatusCode::CONFLICT,
        };
        if status.is_server_error() {
            warn!(code = err.code(), error = %err, "Request failed");
        } else {
            debug!(code = err.code(), error = %err, "Request rejected");
        }
        (status, Json(Self::new(err.to_string(), err.code())))
    }
}

async fn current_user<S: Storage>(
    state: &AppState<S>,
    headers: &HeaderMap,
) -> Result<String, ApiFailure> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());
    let user_header = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    state
        .identity
        .user_id(&Credentials {
            bearer,
            user_header,
        })
        .await
        .ok_or_else(ApiError::unauthorized)
}

// =============================================================================
// Global endpoints
// =============================================================================

/// Health check endpoint.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// =============================================================================
// Session endpoints
// =============================================================================

async fn connect<S: Storage + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(target): Json<ServerTarget>,
) -> Result<Json<ConnectResponse>, ApiFailure> {
    let user = current_user(&state, &headers).await?;
    let response = state
        .service
        .connect(&user, target)
        .await
        .map_err(ApiError::from_session)?;
    Ok(Json(response))
}

async fn list_sessions<S: Storage + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionSummary>>, ApiFailure> {
    let user = current_user(&state, &headers).await?;
    let sessions = state
        .service
        .list_sessions(&user)
        .await
        .map_err(ApiError::from_session)?;
    Ok(Json(sessions))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolsResponse {
    pub tools: Vec<McpTool>,
}

async fn list_tools<S: Storage + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ToolsResponse>, ApiFailure> {
    let user = current_user(&state, &headers).await?;
    let tools = state
        .service
        .list_tools(&user, &id)
        .await
        .map_err(ApiError::from_session)?;
    Ok(Json(ToolsResponse { tools }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub session_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_args: Option<Value>,
}

async fn tool_call<S: Storage + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(req): Json<ToolCallRequest>,
) -> Result<Json<ToolCallResult>, ApiFailure> {
    let user = current_user(&state, &headers).await?;
    let arguments = req.tool_args.unwrap_or_else(|| Value::Object(Default::default()));
    let result = state
        .service
        .call_tool(&user, &req.session_id, &req.tool_name, arguments)
        .await
        .map_err(ApiError::from_session)?;
    Ok(Json(result))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisconnectResponse {
    pub success: bool,
    pub message: String,
}

async fn disconnect<S: Storage + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(req): Json<DisconnectRequest>,
) -> Result<Response, ApiFailure> {
    let user = current_user(&state, &headers).await?;
    let removed = state
        .service
        .disconnect(&user, &req.session_id)
        .await
        .map_err(ApiError::from_session)?;

    let response = if removed {
        (
            StatusCode::OK,
            Json(DisconnectResponse {
                success: true,
                message: "Session disconnected".to_string(),
            }),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(DisconnectResponse {
                success: false,
                message: "Session not found".to_string(),
            }),
        )
    };
    Ok(response.into_response())
}

async fn server_config<S: Storage + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ServerConfigView>, ApiFailure> {
    let user = current_user(&state, &headers).await?;
    let config = state
        .service
        .server_config(&user, &id)
        .await
        .map_err(ApiError::from_session)?;
    Ok(Json(config))
}

// =============================================================================
// OAuth endpoints
// =============================================================================

/// Return point of the authorization server. The `state` parameter is the
/// only credential here; the browser carries no API token.
async fn oauth_callback<S: Storage + 'static>(
    State(state): State<AppState<S>>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let redirect = state.service.handle_callback(params).await;
    Redirect::to(&redirect.to_url(&state.app_redirect_url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use mcplink_core::StaticTokenIdentity;
    use mcplink_mcp::CorrelationState;
    use mcplink_storage::MemoryStorage;
    use mcplink_test_utils::fixtures::{memory_service, query_param};
    use mcplink_test_utils::mocks::{MockAuthorizationServer, MockClientFactory, MockTransport};
    use std::sync::Arc;
    use tower::ServiceExt;

    const APP_URL: &str = "https://app.test/mcp";

    fn setup(transport: MockTransport) -> (Router, MockClientFactory, Arc<MemoryStorage>) {
        let factory = MockClientFactory::new(transport, MockAuthorizationServer::new());
        let (service, storage) = memory_service(&factory);
        let identity = StaticTokenIdentity::default()
            .with_token("tok-alice", "alice")
            .with_token("tok-bob", "bob");
        let state = AppState::new(service, Arc::new(identity), APP_URL);
        (create_router(state), factory, storage)
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, token: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn connect_body(server_name: &str) -> Value {
        serde_json::json!({
            "serverId": format!("id-{server_name}"),
            "serverName": server_name,
            "serverUrl": format!("https://{server_name}.mcp.test/mcp"),
            "transport": "streamable_http"
        })
    }

    async fn connect_session(router: &Router, token: &str) -> String {
        let (status, body) = send(
            router,
            post_json("/api/mcp/connect", token, connect_body("github")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _, _) = setup(MockTransport::new());
        let (status, body) = send(&router, get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], true);
    }

    #[tokio::test]
    async fn test_api_requires_user() {
        let (router, _, _) = setup(MockTransport::new());

        let (status, body) = send(&router, get("/api/mcp/sessions", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");

        let (status, _) = send(&router, get("/api/mcp/sessions", Some("tok-unknown"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_connect_list_and_call() {
        let (router, _, _) = setup(MockTransport::new().with_tools(&["search"]));
        let session_id = connect_session(&router, "tok-alice").await;

        let (status, body) = send(&router, get("/api/mcp/sessions", Some("tok-alice"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["sessionId"], session_id.as_str());
        assert_eq!(body[0]["connectionStatus"], "CONNECTED");
        assert_eq!(body[0]["active"], true);

        let (_, body) = send(&router, get("/api/mcp/sessions", Some("tok-bob"))).await;
        assert!(body.as_array().unwrap().is_empty());

        let (status, body) = send(
            &router,
            get(
                &format!("/api/mcp/sessions/{session_id}/tools"),
                Some("tok-alice"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tools"][0]["name"], "search");

        let (status, body) = send(
            &router,
            post_json(
                "/api/mcp/tool-call",
                "tok-alice",
                serde_json::json!({
                    "sessionId": session_id,
                    "toolName": "search",
                    "toolArgs": {"q": "bug"}
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isError"], false);
        assert_eq!(body["content"][0]["text"], r#"search:{"q":"bug"}"#);
    }

    #[tokio::test]
    async fn test_tool_call_on_unknown_session() {
        let (router, _, _) = setup(MockTransport::new());
        let (status, body) = send(
            &router,
            post_json(
                "/api/mcp/tool-call",
                "tok-alice",
                serde_json::json!({"sessionId": "mcs_missing", "toolName": "search"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_disconnect_twice() {
        let (router, _, _) = setup(MockTransport::new());
        let session_id = connect_session(&router, "tok-alice").await;
        let body = serde_json::json!({ "sessionId": session_id });

        let (status, response) = send(
            &router,
            post_json("/api/mcp/disconnect", "tok-alice", body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], true);

        let (status, response) =
            send(&router, post_json("/api/mcp/disconnect", "tok-alice", body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(response["success"], false);
        assert_eq!(response["message"], "Session not found");
    }

    #[tokio::test]
    async fn test_server_config() {
        let (router, _, _) = setup(MockTransport::new());
        let session_id = connect_session(&router, "tok-alice").await;

        let uri = format!("/api/mcp/server-config/{session_id}");
        let (status, body) = send(&router, get(&uri, Some("tok-alice"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], "https://github.mcp.test/mcp");
        assert_eq!(body["transport"], "streamable_http");

        let (status, _) = send(&router, get(&uri, Some("tok-bob"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oauth_callback_redirects() {
        let (router, factory, _) = setup(MockTransport::new().requiring_auth());

        let (status, body) = send(
            &router,
            post_json("/api/mcp/connect", "tok-alice", connect_body("linear")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requiresAuth"], true);
        assert_eq!(body["connectionStatus"], "AUTHENTICATING");
        let session_id = body["sessionId"].as_str().unwrap().to_string();
        let state = query_param(body["authorizationUrl"].as_str().unwrap(), "state").unwrap();

        let uri = format!(
            "{OAUTH_CALLBACK_PATH}?code=abc123&state={}",
            url_encode(&state)
        );
        let response = router.clone().oneshot(get(&uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with(APP_URL));
        assert_eq!(query_param(location, "step").as_deref(), Some("success"));
        assert_eq!(
            query_param(location, "sessionId").as_deref(),
            Some(session_id.as_str())
        );
        assert_eq!(query_param(location, "server").as_deref(), Some("linear"));
        assert!(!location.contains("mock-access"));
        assert_eq!(factory.auth().exchanged_codes(), vec!["abc123"]);

        let (_, body) = send(&router, get("/api/mcp/sessions", Some("tok-alice"))).await;
        assert_eq!(body[0]["active"], true);
    }

    #[tokio::test]
    async fn test_oauth_callback_unknown_session() {
        let (router, _, _) = setup(MockTransport::new());
        let state = CorrelationState::new("s1", Some("srv1".to_string())).encode();
        let uri = format!(
            "{OAUTH_CALLBACK_PATH}?code=abc123&state={}",
            url_encode(&state)
        );

        let response = router.clone().oneshot(get(&uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert_eq!(query_param(location, "step").as_deref(), Some("error"));
        assert_eq!(query_param(location, "server").as_deref(), Some("srv1"));
    }

    #[tokio::test]
    async fn test_store_unavailable() {
        let (router, _, storage) = setup(MockTransport::new());
        storage.set_offline(true);

        let (status, body) = send(&router, get("/api/mcp/sessions", Some("tok-alice"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "STORE_UNAVAILABLE");
    }

    fn url_encode(value: &str) -> String {
        url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
    }
}
