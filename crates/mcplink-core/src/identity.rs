//! Identity of API callers.
//!
//! The session service only needs a stable user id per request; how it is
//! derived is up to the `IdentityProvider`.

use crate::config::IdentityConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Credentials presented with a request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Value of an `Authorization: Bearer ...` header.
    pub bearer: Option<String>,
    /// Value of an `x-user-id` header.
    pub user_header: Option<String>,
}

/// Resolves the current user from request credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The user id, or `None` when the caller is not authenticated.
    async fn user_id(&self, credentials: &Credentials) -> Option<String>;
}

/// Maps configured bearer tokens to user ids.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenIdentity {
    tokens: HashMap<String, String>,
}

impl StaticTokenIdentity {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    /// Add a token for a user.
    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenIdentity {
    async fn user_id(&self, credentials: &Credentials) -> Option<String> {
        let token = credentials.bearer.as_deref()?.as_bytes();
        self.tokens
            .iter()
            .find(|(known, _)| known.as_bytes().ct_eq(token).into())
            .map(|(_, user)| user.clone())
    }
}

/// Trusts the `x-user-id` header. Only for development behind a trusted proxy.
#[derive(Debug, Clone, Default)]
pub struct HeaderIdentity;

#[async_trait]
impl IdentityProvider for HeaderIdentity {
    async fn user_id(&self, credentials: &Credentials) -> Option<String> {
        credentials
            .user_header
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from)
    }
}

/// Tries providers in order; the first match wins.
#[derive(Clone, Default)]
pub struct IdentityChain {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl IdentityChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Build the chain described by configuration.
    pub fn from_config(config: &IdentityConfig) -> Self {
        let mut chain = Self::new().with(Arc::new(StaticTokenIdentity::new(
            config.tokens.clone().unwrap_or_default(),
        )));
        if config.trust_user_header.unwrap_or(false) {
            tracing::warn!("Trusting x-user-id header for identity");
            chain = chain.with(Arc::new(HeaderIdentity));
        }
        chain
    }
}

#[async_trait]
impl IdentityProvider for IdentityChain {
    async fn user_id(&self, credentials: &Credentials) -> Option<String> {
        for provider in &self.providers {
            if let Some(user) = provider.user_id(credentials).await {
                return Some(user);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bearer(token: &str) -> Credentials {
        Credentials {
            bearer: Some(token.to_string()),
            user_header: None,
        }
    }

    #[tokio::test]
    async fn test_static_tokens() {
        let identity = StaticTokenIdentity::default().with_token("tok-a", "alice");
        assert_eq!(identity.user_id(&bearer("tok-a")).await.as_deref(), Some("alice"));
        assert_eq!(identity.user_id(&bearer("tok-x")).await, None);
        assert_eq!(identity.user_id(&Credentials::default()).await, None);
    }

    #[tokio::test]
    async fn test_header_identity() {
        let creds = Credentials {
            bearer: None,
            user_header: Some(" bob ".to_string()),
        };
        assert_eq!(HeaderIdentity.user_id(&creds).await.as_deref(), Some("bob"));

        let blank = Credentials {
            bearer: None,
            user_header: Some("  ".to_string()),
        };
        assert_eq!(HeaderIdentity.user_id(&blank).await, None);
    }

    #[tokio::test]
    async fn test_chain_from_config() {
        let config = IdentityConfig {
            tokens: Some(HashMap::from([("tok-a".to_string(), "alice".to_string())])),
            trust_user_header: Some(false),
        };
        let chain = IdentityChain::from_config(&config);
        let creds = Credentials {
            bearer: Some("wrong".to_string()),
            user_header: Some("mallory".to_string()),
        };
        assert_eq!(chain.user_id(&creds).await, None);
        assert_eq!(chain.user_id(&bearer("tok-a")).await.as_deref(), Some("alice"));

        let trusting = IdentityChain::from_config(&IdentityConfig {
            trust_user_header: Some(true),
            ..config
        });
        assert_eq!(trusting.user_id(&creds).await.as_deref(), Some("mallory"));
    }
}
