//! Configuration management for mcplink.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/mcplink/config.json` (or `config.jsonc`)
//! 2. Environment variable: `MCPLINK_CONFIG_CONTENT`
//! 3. Project config: `mcplink.json` or `mcplink.jsonc` in the working directory
//!
//! Supports JSONC (JSON with comments) and variable substitution:
//! - `{env:VAR_NAME}` - Substitute environment variable
//! - `{file:path}` - Substitute file contents

use crate::error::{ConfigError, CoreResult};
use mcplink_mcp::{OAuthConfig, OAUTH_CALLBACK_PATH};
use mcplink_util::LogLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Address the server listens on when none is configured.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8484";

/// Client connection records are kept this long by default.
pub const DEFAULT_RETENTION_HOURS: u64 = 12;

/// Default per-request timeout towards tool servers.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Static regex for variable substitution, compiled once.
static VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

/// Get the variable substitution regex, compiling it once on first use.
fn var_regex() -> &'static regex::Regex {
    VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\{(env|file):([^}]+)\}")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (`trace`, `debug`, `info`, `warn`, `error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// HTTP server settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// OAuth client settings used towards tool servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthSettings>,

    /// How API callers are identified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityConfig>,

    /// Client runtime settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    /// Session settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:8484`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Externally reachable base URL; the OAuth redirect is derived from it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    /// Where the browser lands after the OAuth callback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_redirect_url: Option<String>,
}

impl ServerConfig {
    pub fn merge(mut self, other: Self) -> Self {
        if other.address.is_some() {
            self.address = other.address;
        }
        if other.public_url.is_some() {
            self.public_url = other.public_url;
        }
        if other.app_redirect_url.is_some() {
            self.app_redirect_url = other.app_redirect_url;
        }
        self
    }
}

/// OAuth client settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    /// Pre-registered client id. Without it, clients register dynamically.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Pre-registered client secret.
    ///
    /// Supports variable substitution: `{env:MCPLINK_CLIENT_SECRET}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Name used in dynamic registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

impl OAuthSettings {
    pub fn merge(mut self, other: Self) -> Self {
        if other.client_id.is_some() {
            self.client_id = other.client_id;
        }
        if other.client_secret.is_some() {
            self.client_secret = other.client_secret;
        }
        if other.scope.is_some() {
            self.scope = other.scope;
        }
        if other.client_name.is_some() {
            self.client_name = other.client_name;
        }
        self
    }
}

/// Identity configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Bearer token -> user id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<HashMap<String, String>>,

    /// Trust an `x-user-id` header. Development only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_user_header: Option<bool>,
}

impl IdentityConfig {
    pub fn merge(mut self, other: Self) -> Self {
        self.tokens = merge_hashmap(self.tokens, other.tokens);
        if other.trust_user_header.is_some() {
            self.trust_user_header = other.trust_user_header;
        }
        self
    }
}

/// Client runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the mcplink server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    /// Bearer token presented to the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Where connection records are persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// How long connection records stay valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_hours: Option<u64>,
}

impl ClientConfig {
    pub fn merge(mut self, other: Self) -> Self {
        if other.server_url.is_some() {
            self.server_url = other.server_url;
        }
        if other.api_token.is_some() {
            self.api_token = other.api_token;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.retention_hours.is_some() {
            self.retention_hours = other.retention_hours;
        }
        self
    }
}

/// Session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-request timeout towards tool servers, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl SessionConfig {
    pub fn merge(mut self, other: Self) -> Self {
        if other.request_timeout_secs.is_some() {
            self.request_timeout_secs = other.request_timeout_secs;
        }
        self
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Loading order (later sources override earlier):
    /// 1. Global config from `~/.config/mcplink/`
    /// 2. `MCPLINK_CONFIG_CONTENT` environment variable
    /// 3. Project config from `project_dir`
    pub async fn load(project_dir: Option<&Path>) -> CoreResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        if let Some(global_dir) = Self::global_config_dir() {
            for name in &["config.json", "config.jsonc"] {
                let path = global_dir.join(name);
                if path.exists() {
                    let loaded = Self::load_file(&path).await?;
                    config = config.merge(loaded);
                    sources.push(path);
                    break;
                }
            }
        }

        if let Ok(content) = std::env::var("MCPLINK_CONFIG_CONTENT") {
            let content = Self::substitute_variables(&content, Path::new("."))?;
            let loaded = Self::parse_jsonc(&content, "<env>")?;
            config = config.merge(loaded);
        }

        if let Some(dir) = project_dir {
            for name in &["mcplink.jsonc", "mcplink.json"] {
                let path = dir.join(name);
                if path.exists() {
                    let loaded = Self::load_file(&path).await?;
                    config = config.merge(loaded);
                    sources.push(path);
                    break;
                }
            }
        }

        Ok((config, sources))
    }

    /// Get the global config directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            if let Some(home) = dirs::home_dir() {
                let xdg_config = home.join(".config").join("mcplink");
                if xdg_config.exists() {
                    return Some(xdg_config);
                }
            }
        }

        dirs::config_dir().map(|d| d.join("mcplink"))
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> CoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::substitute_variables(&content, path)?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Parse JSONC (JSON with comments).
    pub fn parse_jsonc(content: &str, source: &str) -> CoreResult<Self> {
        let stripped = Self::strip_comments(content);

        serde_json::from_str(&stripped).map_err(|e| {
            ConfigError::InvalidJson {
                path: source.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Strip JSON comments.
    fn strip_comments(input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut in_string = false;
        let mut escape_next = false;

        while let Some(c) = chars.next() {
            if escape_next {
                result.push(c);
                escape_next = false;
                continue;
            }

            if c == '\\' && in_string {
                result.push(c);
                escape_next = true;
                continue;
            }

            if c == '"' {
                in_string = !in_string;
                result.push(c);
                continue;
            }

            if in_string {
                result.push(c);
                continue;
            }

            if c == '/' {
                match chars.peek() {
                    Some('/') => {
                        chars.next();
                        for c in chars.by_ref() {
                            if c == '\n' {
                                result.push('\n');
                                break;
                            }
                        }
                        continue;
                    }
                    Some('*') => {
                        chars.next();
                        let mut prev = ' ';
                        for c in chars.by_ref() {
                            if prev == '*' && c == '/' {
                                break;
                            }
                            // Keep line numbers stable for error messages.
                            if c == '\n' {
                                result.push('\n');
                            }
                            prev = c;
                        }
                        continue;
                    }
                    _ => {}
                }
            }

            result.push(c);
        }

        result
    }

    /// Substitute `{env:..}` and `{file:..}` references.
    fn substitute_variables(content: &str, config_path: &Path) -> CoreResult<String> {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        let mut result = content.to_string();

        for cap in var_regex().captures_iter(content) {
            let (Some(full_match), Some(kind), Some(value)) = (cap.get(0), cap.get(1), cap.get(2))
            else {
                continue;
            };
            let value = value.as_str();

            let replacement = match kind.as_str() {
                "env" => std::env::var(value).map_err(|_| ConfigError::EnvVarNotFound {
                    name: value.to_string(),
                })?,
                "file" => {
                    let file_path = config_dir.join(value);
                    std::fs::read_to_string(&file_path)
                        .map_err(|_| ConfigError::FileRefNotFound {
                            path: file_path.display().to_string(),
                        })?
                        .trim()
                        .to_string()
                }
                _ => continue,
            };

            // Values land inside JSON strings.
            let escaped = serde_json::to_string(&replacement)?;
            let escaped = &escaped[1..escaped.len() - 1];
            result = result.replace(full_match.as_str(), escaped);
        }

        Ok(result)
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        self.server = merge_nested(self.server, other.server, ServerConfig::merge);
        self.oauth = merge_nested(self.oauth, other.oauth, OAuthSettings::merge);
        self.identity = merge_nested(self.identity, other.identity, IdentityConfig::merge);
        self.client = merge_nested(self.client, other.client, ClientConfig::merge);
        self.session = merge_nested(self.session, other.session, SessionConfig::merge);
        self
    }

    /// Configured log level, if valid.
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Listen address.
    pub fn server_address(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.address.clone())
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string())
    }

    /// Externally reachable base URL, without a trailing slash.
    pub fn public_url(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.public_url.clone())
            .unwrap_or_else(|| format!("http://{}", self.server_address()))
            .trim_end_matches('/')
            .to_string()
    }

    /// Where the browser is sent after the OAuth callback.
    pub fn app_redirect_url(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.app_redirect_url.clone())
            .unwrap_or_else(|| format!("{}/", self.public_url()))
    }

    /// OAuth client configuration for tool servers.
    pub fn oauth_config(&self) -> OAuthConfig {
        let settings = self.oauth.clone().unwrap_or_default();
        OAuthConfig {
            client_id: settings.client_id,
            client_secret: settings.client_secret,
            scope: settings.scope,
            client_name: settings.client_name,
            redirect_uri: Some(format!("{}{}", self.public_url(), OAUTH_CALLBACK_PATH)),
        }
    }

    /// Per-request timeout towards tool servers.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.session
                .as_ref()
                .and_then(|s| s.request_timeout_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Retention of client connection records.
    pub fn retention(&self) -> Duration {
        let hours = self
            .client
            .as_ref()
            .and_then(|c| c.retention_hours)
            .unwrap_or(DEFAULT_RETENTION_HOURS);
        Duration::from_secs(hours * 3600)
    }
}

fn merge_nested<T>(base: Option<T>, other: Option<T>, merge: fn(T, T) -> T) -> Option<T> {
    match (base, other) {
        (Some(base), Some(other)) => Some(merge(base, other)),
        (base, None) => base,
        (None, other) => other,
    }
}

/// Merge two HashMaps.
fn merge_hashmap<K: std::hash::Hash + Eq, V>(
    base: Option<HashMap<K, V>>,
    other: Option<HashMap<K, V>>,
) -> Option<HashMap<K, V>> {
    match (base, other) {
        (Some(mut b), Some(o)) => {
            b.extend(o);
            Some(b)
        }
        (b, None) => b,
        (None, o) => o,
    }
}
