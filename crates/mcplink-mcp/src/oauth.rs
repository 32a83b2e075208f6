//! OAuth support for remote MCP servers.
//!
//! Implements the OAuth 2.0 authorization code grant with PKCE:
//! - authorization server metadata discovery (RFC 8414), with the
//!   conventional `/authorize`, `/token`, `/register` fallbacks;
//! - dynamic client registration (RFC 7591) when no client id is configured;
//! - code exchange and refresh.
//!
//! `OAuthProvider` keeps the per-session auth state. Network access goes
//! through the `AuthorizationServer` trait so the handshake can be driven
//! against a scripted server in tests.

use crate::error::{McpError, McpResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use mcplink_util::now_secs;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Path of the OAuth redirect endpoint served by mcplink.
pub const OAUTH_CALLBACK_PATH: &str = "/api/mcp/oauth/callback";

/// Base URL used for the redirect when none is configured.
pub const DEFAULT_CALLBACK_BASE: &str = "http://127.0.0.1:8484";

/// Seconds before expiry at which a token is already treated as expired.
pub const TOKEN_EXPIRY_SKEW_SECS: u64 = 60;

/// OAuth configuration.
#[derive(Debug, Clone, Default)]
pub struct OAuthConfig {
    /// Pre-registered client ID (optional).
    pub client_id: Option<String>,
    /// Pre-registered client secret (optional).
    pub client_secret: Option<String>,
    /// Requested scopes.
    pub scope: Option<String>,
    /// Client name sent during dynamic registration.
    pub client_name: Option<String>,
    /// Redirect URI registered with the authorization server.
    pub redirect_uri: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Tokens stored with an absolute expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) when the access token expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl StoredTokens {
    /// Convert a token response received at `now`.
    pub fn from_response(tokens: OAuthTokens, now: u64) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_in.map(|exp| now + exp),
            scope: tokens.scope,
        }
    }

    /// Whether the access token is expired (or within the skew of expiring).
    /// Tokens without an expiry never expire.
    pub fn is_expired_at(&self, now: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + TOKEN_EXPIRY_SKEW_SECS,
            None => false,
        }
    }
}

/// Client information (from dynamic registration or config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<u64>,
}

/// Dynamic client registration request (RFC 7591).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub redirect_uris: Vec<String>,
    pub client_name: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Authorization server metadata (RFC 8414), reduced to what the flow uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthServerMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
}

impl AuthServerMetadata {
    /// Conventional endpoints on the server's origin, used when discovery fails.
    pub fn fallback(server_url: &str) -> McpResult<Self> {
        let origin = origin_of(server_url)?;
        Ok(Self {
            issuer: Some(origin.clone()),
            authorization_endpoint: format!("{origin}/authorize"),
            token_endpoint: format!("{origin}/token"),
            registration_endpoint: Some(format!("{origin}/register")),
            scopes_supported: None,
        })
    }

    /// Well-known metadata URL for a server.
    pub fn discovery_url(server_url: &str) -> McpResult<String> {
        Ok(format!(
            "{}/.well-known/oauth-authorization-server",
            origin_of(server_url)?
        ))
    }
}

fn origin_of(server_url: &str) -> McpResult<String> {
    let url = url::Url::parse(server_url)
        .map_err(|e| McpError::auth_failed(format!("Invalid server URL {server_url}: {e}")))?;
    Ok(url.origin().ascii_serialization())
}

/// OAuth state held for one session.
#[derive(Debug, Clone, Default)]
struct OAuthState {
    metadata: Option<AuthServerMetadata>,
    client_info: Option<ClientInfo>,
    tokens: Option<StoredTokens>,
    /// PKCE code verifier (temporary, during auth flow).
    code_verifier: Option<String>,
    /// OAuth state parameter (temporary, during auth flow).
    oauth_state: Option<String>,
}

/// OAuth provider for one MCP session.
pub struct OAuthProvider {
    /// Server name, for logging.
    server_name: String,
    config: OAuthConfig,
    state: RwLock<OAuthState>,
}

impl OAuthProvider {
    /// Create a new OAuth provider.
    pub fn new(server_name: impl Into<String>, config: OAuthConfig) -> Self {
        Self {
            server_name: server_name.into(),
            config,
            state: RwLock::new(OAuthState::default()),
        }
    }

    /// Get the redirect URL.
    pub fn redirect_url(&self) -> String {
        self.config
            .redirect_uri
            .clone()
            .unwrap_or_else(|| format!("{DEFAULT_CALLBACK_BASE}{OAUTH_CALLBACK_PATH}"))
    }

    /// Requested scope.
    pub fn scope(&self) -> Option<&str> {
        self.config.scope.as_deref()
    }

    /// Client metadata for dynamic registration.
    pub fn client_metadata(&self) -> RegistrationRequest {
        let auth_method = if self.config.client_secret.is_some() {
            "client_secret_post"
        } else {
            "none"
        };

        RegistrationRequest {
            redirect_uris: vec![self.redirect_url()],
            client_name: self
                .config
                .client_name
                .clone()
                .unwrap_or_else(|| "mcplink".to_string()),
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: auth_method.to_string(),
            scope: self.config.scope.clone(),
        }
    }

    /// Get client information (from config or registration).
    pub async fn client_info(&self) -> Option<ClientInfo> {
        if let Some(ref client_id) = self.config.client_id {
            return Some(ClientInfo {
                client_id: client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                client_id_issued_at: None,
                client_secret_expires_at: None,
            });
        }

        let state = self.state.read().await;
        let info = state.client_info.as_ref()?;
        if let Some(expires_at) = info.client_secret_expires_at {
            // 0 means the secret never expires (RFC 7591).
            if expires_at != 0 && expires_at < now_secs() {
                info!(server = %self.server_name, "Registered client secret expired");
                return None;
            }
        }
        Some(info.clone())
    }

    /// Save client information from dynamic registration.
    pub async fn save_client_info(&self, info: ClientInfo) {
        self.state.write().await.client_info = Some(info);
        info!(server = %self.server_name, "Saved dynamically registered client");
    }

    /// Discovered authorization server metadata.
    pub async fn metadata(&self) -> Option<AuthServerMetadata> {
        self.state.read().await.metadata.clone()
    }

    /// Remember discovered metadata.
    pub async fn save_metadata(&self, metadata: AuthServerMetadata) {
        self.state.write().await.metadata = Some(metadata);
    }

    /// Stored tokens.
    pub async fn tokens(&self) -> Option<StoredTokens> {
        self.state.read().await.tokens.clone()
    }

    /// Save a token response.
    ///
    /// A refresh response without a new refresh token keeps the old one.
    pub async fn save_tokens(&self, tokens: OAuthTokens) -> StoredTokens {
        let mut state = self.state.write().await;
        let mut stored = StoredTokens::from_response(tokens, now_secs());
        if stored.refresh_token.is_none() {
            stored.refresh_token = state
                .tokens
                .as_ref()
                .and_then(|t| t.refresh_token.clone());
        }
        state.tokens = Some(stored.clone());
        debug!(server = %self.server_name, "Saved OAuth tokens");
        stored
    }

    /// Replace stored tokens wholesale.
    pub async fn set_tokens(&self, tokens: Option<StoredTokens>) {
        self.state.write().await.tokens = tokens;
    }

    /// Generate PKCE code verifier.
    pub fn generate_code_verifier() -> String {
        let mut rng = rand::thread_rng();
        let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
        URL_SAFE_NO_PAD.encode(&bytes)
    }

    /// Generate PKCE code challenge from verifier.
    pub fn generate_code_challenge(verifier: &str) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Record the verifier and state of a pending authorization.
    pub async fn begin_authorization(&self, code_verifier: String, oauth_state: String) {
        let mut state = self.state.write().await;
        state.code_verifier = Some(code_verifier);
        state.oauth_state = Some(oauth_state);
    }

    /// Whether an authorization is waiting for its callback.
    pub async fn has_pending_authorization(&self) -> bool {
        self.state.read().await.code_verifier.is_some()
    }

    /// Take the pending verifier, clearing the temporary auth state.
    ///
    /// A second call fails, so a callback cannot be replayed.
    pub async fn take_code_verifier(&self) -> McpResult<String> {
        let mut state = self.state.write().await;
        state.oauth_state = None;
        state.code_verifier.take().ok_or_else(|| {
            McpError::auth_failed(format!(
                "No pending authorization for {}",
                self.server_name
            ))
        })
    }

    /// Check if tokens are present and not expired.
    pub async fn has_valid_tokens(&self) -> bool {
        let state = self.state.read().await;
        state
            .tokens
            .as_ref()
            .is_some_and(|t| !t.is_expired_at(now_secs()))
    }

    /// Get the access token if available and valid.
    pub async fn access_token(&self) -> Option<String> {
        let state = self.state.read().await;
        state
            .tokens
            .as_ref()
            .filter(|t| !t.is_expired_at(now_secs()))
            .map(|t| t.access_token.clone())
    }
}

/// Build authorization URL.
pub fn build_auth_url(
    auth_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: Option<&str>,
    state: &str,
    code_challenge: &str,
) -> String {
    let separator = if auth_endpoint.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{}{}response_type=code&client_id={}&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
        auth_endpoint,
        separator,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(state),
        urlencoding::encode(code_challenge),
    );

    if let Some(scope) = scope {
        url.push_str(&format!("&scope={}", urlencoding::encode(scope)));
    }

    url
}

/// The remote side of the OAuth handshake.
#[async_trait]
pub trait AuthorizationServer: Send + Sync {
    /// Discover metadata for the server at `server_url`.
    async fn metadata(&self, server_url: &str) -> McpResult<AuthServerMetadata>;

    /// Register a client dynamically.
    async fn register(
        &self,
        metadata: &AuthServerMetadata,
        request: &RegistrationRequest,
    ) -> McpResult<ClientInfo>;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(
        &self,
        metadata: &AuthServerMetadata,
        client: &ClientInfo,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> McpResult<OAuthTokens>;

    /// Obtain new tokens with a refresh token.
    async fn refresh(
        &self,
        metadata: &AuthServerMetadata,
        client: &ClientInfo,
        refresh_token: &str,
    ) -> McpResult<OAuthTokens>;
}

/// `AuthorizationServer` backed by real HTTP endpoints.
#[derive(Debug, Clone, Default)]
pub struct HttpAuthorizationServer {
    client: reqwest::Client,
}

impl HttpAuthorizationServer {
    pub fn new() -> Self {
        Self::default()
    }

    async fn token_request(
        &self,
        token_endpoint: &str,
        params: &[(&str, &str)],
        what: &str,
    ) -> McpResult<OAuthTokens> {
        let response = self
            .client
            .post(token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| McpError::auth_failed(format!("{what} request failed: {e}")))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::auth_failed(format!("{what} failed: {text}")));
        }

        response
            .json()
            .await
            .map_err(|e| McpError::auth_failed(format!("Invalid {what} response: {e}")))
    }
}

#[async_trait]
impl AuthorizationServer for HttpAuthorizationServer {
    async fn metadata(&self, server_url: &str) -> McpResult<AuthServerMetadata> {
        let discovery_url = AuthServerMetadata::discovery_url(server_url)?;
        debug!(url = %discovery_url, "Discovering authorization server metadata");

        match self.client.get(&discovery_url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<AuthServerMetadata>().await {
                    Ok(metadata) => return Ok(metadata),
                    Err(e) => debug!(error = %e, "Invalid metadata document, using fallback"),
                }
            }
            Ok(response) => {
                debug!(status = %response.status(), "No metadata document, using fallback")
            }
            Err(e) => debug!(error = %e, "Metadata discovery failed, using fallback"),
        }

        AuthServerMetadata::fallback(server_url)
    }

    async fn register(
        &self,
        metadata: &AuthServerMetadata,
        request: &RegistrationRequest,
    ) -> McpResult<ClientInfo> {
        let endpoint = metadata.registration_endpoint.as_deref().ok_or_else(|| {
            McpError::auth_failed("Authorization server does not support client registration")
        })?;

        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| McpError::auth_failed(format!("Registration request failed: {e}")))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::auth_failed(format!(
                "Client registration failed: {text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| McpError::auth_failed(format!("Invalid registration response: {e}")))
    }

    async fn exchange_code(
        &self,
        metadata: &AuthServerMetadata,
        client: &ClientInfo,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> McpResult<OAuthTokens> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = client.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        self.token_request(&metadata.token_endpoint, &params, "Token exchange")
            .await
    }

    async fn refresh(
        &self,
        metadata: &AuthServerMetadata,
        client: &ClientInfo,
        refresh_token: &str,
    ) -> McpResult<OAuthTokens> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client.client_id.as_str()),
        ];
        if let Some(secret) = client.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        self.token_request(&metadata.token_endpoint, &params, "Token refresh")
            .await
            .map_err(|e| McpError::TokenRefreshFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(config: OAuthConfig) -> OAuthProvider {
        OAuthProvider::new("github", config)
    }

    fn client() -> ClientInfo {
        ClientInfo {
            client_id: "client123".to_string(),
            client_secret: None,
            client_id_issued_at: None,
            client_secret_expires_at: None,
        }
    }

    #[test]
    fn test_generate_code_verifier() {
        let verifier = OAuthProvider::generate_code_verifier();
        // Base64url encoded 32 bytes = 43 characters
        assert_eq!(verifier.len(), 43);
        assert_ne!(verifier, OAuthProvider::generate_code_verifier());
    }

    #[test]
    fn test_generate_code_challenge() {
        // RFC 7636 appendix B
        let challenge =
            OAuthProvider::generate_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_build_auth_url() {
        let url = build_auth_url(
            "https://auth.example.com/authorize",
            "client123",
            "http://localhost:8484/api/mcp/oauth/callback",
            Some("read write"),
            "{\"sessionId\":\"s1\"}",
            "challenge123",
        );

        assert!(url.starts_with("https://auth.example.com/authorize?response_type=code"));
        assert!(url.contains("client_id=client123"));
        assert!(url.contains("scope=read%20write"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state=%7B%22sessionId%22%3A%22s1%22%7D"));
    }

    #[test]
    fn test_build_auth_url_no_scope() {
        let url = build_auth_url(
            "https://auth.example.com/authorize?tenant=x",
            "client123",
            "http://localhost/callback",
            None,
            "state123",
            "challenge123",
        );

        assert!(url.contains("?tenant=x&response_type=code"));
        assert!(!url.contains("scope="));
    }

    #[test]
    fn test_metadata_fallback() {
        let metadata = AuthServerMetadata::fallback("https://mcp.example.com:8443/v1/mcp").unwrap();
        assert_eq!(
            metadata.authorization_endpoint,
            "https://mcp.example.com:8443/authorize"
        );
        assert_eq!(metadata.token_endpoint, "https://mcp.example.com:8443/token");
        assert_eq!(
            metadata.registration_endpoint.as_deref(),
            Some("https://mcp.example.com:8443/register")
        );
        assert!(AuthServerMetadata::fallback("not a url").is_err());
    }

    #[test]
    fn test_stored_tokens_expiry() {
        let tokens = StoredTokens {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_at: Some(1_000),
            scope: None,
        };
        assert!(!tokens.is_expired_at(900));
        assert!(tokens.is_expired_at(950));
        assert!(tokens.is_expired_at(2_000));

        let forever = StoredTokens {
            expires_at: None,
            ..tokens
        };
        assert!(!forever.is_expired_at(u64::MAX / 2));
    }

    #[test]
    fn test_redirect_url() {
        assert_eq!(
            provider(OAuthConfig::default()).redirect_url(),
            "http://127.0.0.1:8484/api/mcp/oauth/callback"
        );
        let configured = provider(OAuthConfig {
            redirect_uri: Some("https://app.example.com/cb".to_string()),
            ..Default::default()
        });
        assert_eq!(configured.redirect_url(), "https://app.example.com/cb");
    }

    #[test]
    fn test_client_metadata() {
        let metadata = provider(OAuthConfig::default()).client_metadata();
        assert_eq!(metadata.client_name, "mcplink");
        assert_eq!(metadata.token_endpoint_auth_method, "none");

        let with_secret = provider(OAuthConfig {
            client_secret: Some("s".to_string()),
            client_name: Some("Acme".to_string()),
            ..Default::default()
        })
        .client_metadata();
        assert_eq!(with_secret.client_name, "Acme");
        assert_eq!(with_secret.token_endpoint_auth_method, "client_secret_post");
    }

    #[tokio::test]
    async fn test_client_info_from_config_and_registration() {
        let configured = provider(OAuthConfig {
            client_id: Some("client123".to_string()),
            client_secret: Some("secret456".to_string()),
            ..Default::default()
        });
        let info = configured.client_info().await.unwrap();
        assert_eq!(info.client_id, "client123");

        let dynamic = provider(OAuthConfig::default());
        assert!(dynamic.client_info().await.is_none());
        dynamic.save_client_info(client()).await;
        assert_eq!(dynamic.client_info().await.unwrap().client_id, "client123");
    }

    #[tokio::test]
    async fn test_expired_registration_is_ignored() {
        let dynamic = provider(OAuthConfig::default());
        dynamic
            .save_client_info(ClientInfo {
                client_secret_expires_at: Some(1),
                ..client()
            })
            .await;
        assert!(dynamic.client_info().await.is_none());
    }

    #[tokio::test]
    async fn test_pending_authorization_is_consumed_once() {
        let provider = provider(OAuthConfig::default());
        assert!(provider.take_code_verifier().await.is_err());

        provider
            .begin_authorization("verifier".to_string(), "state".to_string())
            .await;
        assert!(provider.has_pending_authorization().await);
        assert_eq!(provider.take_code_verifier().await.unwrap(), "verifier");
        assert!(!provider.has_pending_authorization().await);
        assert!(matches!(
            provider.take_code_verifier().await,
            Err(McpError::AuthFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_save_tokens_keeps_refresh_token() {
        let provider = provider(OAuthConfig::default());
        assert!(!provider.has_valid_tokens().await);

        provider
            .save_tokens(OAuthTokens {
                access_token: "a1".to_string(),
                token_type: "Bearer".to_string(),
                refresh_token: Some("r1".to_string()),
                expires_in: Some(3600),
                scope: None,
            })
            .await;
        assert_eq!(provider.access_token().await.as_deref(), Some("a1"));

        let stored = provider
            .save_tokens(OAuthTokens {
                access_token: "a2".to_string(),
                token_type: "Bearer".to_string(),
                refresh_token: None,
                expires_in: Some(3600),
                scope: None,
            })
            .await;
        assert_eq!(stored.access_token, "a2");
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_expired_token_is_not_returned() {
        let provider = provider(OAuthConfig::default());
        provider
            .set_tokens(Some(StoredTokens {
                access_token: "old".to_string(),
                refresh_token: Some("r".to_string()),
                expires_at: Some(now_secs() + 10),
                scope: None,
            }))
            .await;
        assert!(!provider.has_valid_tokens().await);
        assert!(provider.access_token().await.is_none());
        assert!(provider.tokens().await.is_some());
    }

    #[tokio::test]
    async fn test_http_metadata_discovery() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": "https://auth.example.com",
                "authorization_endpoint": "https://auth.example.com/oauth/authorize",
                "token_endpoint": "https://auth.example.com/oauth/token",
                "registration_endpoint": "https://auth.example.com/oauth/register"
            })))
            .mount(&server)
            .await;

        let auth = HttpAuthorizationServer::new();
        let metadata = auth
            .metadata(&format!("{}/mcp", server.uri()))
            .await
            .unwrap();
        assert_eq!(
            metadata.authorization_endpoint,
            "https://auth.example.com/oauth/authorize"
        );
    }

    #[tokio::test]
    async fn test_http_metadata_falls_back() {
        let server = MockServer::start().await;
        let auth = HttpAuthorizationServer::new();
        let metadata = auth
            .metadata(&format!("{}/mcp", server.uri()))
            .await
            .unwrap();
        assert_eq!(metadata.token_endpoint, format!("{}/token", server.uri()));
    }

    #[tokio::test]
    async fn test_http_register_and_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "client_id": "dyn-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc123"))
            .and(body_string_contains("code_verifier=v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "token_type": "Bearer",
                "refresh_token": "rt",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let auth = HttpAuthorizationServer::new();
        let metadata = AuthServerMetadata::fallback(&server.uri()).unwrap();
        let registered = auth
            .register(&metadata, &provider(OAuthConfig::default()).client_metadata())
            .await
            .unwrap();
        assert_eq!(registered.client_id, "dyn-1");

        let tokens = auth
            .exchange_code(&metadata, &registered, "abc123", "http://cb", "v1")
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt"));
    }

    #[tokio::test]
    async fn test_http_refresh_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let auth = HttpAuthorizationServer::new();
        let metadata = AuthServerMetadata::fallback(&server.uri()).unwrap();
        let err = auth.refresh(&metadata, &client(), "rt").await.unwrap_err();
        assert!(matches!(err, McpError::TokenRefreshFailed(ref m) if m.contains("invalid_grant")));
    }
}
