//! Server state.

use mcplink_core::{IdentityProvider, SessionService};
use mcplink_storage::Storage;
use std::sync::Arc;

/// State shared by every request handler.
pub struct AppState<S: Storage> {
    /// The session service.
    pub service: SessionService<S>,
    /// Resolves the calling user.
    pub identity: Arc<dyn IdentityProvider>,
    /// Where the OAuth callback sends the browser.
    pub app_redirect_url: String,
}

impl<S: Storage> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            identity: self.identity.clone(),
            app_redirect_url: self.app_redirect_url.clone(),
        }
    }
}

impl<S: Storage> AppState<S> {
    pub fn new(
        service: SessionService<S>,
        identity: Arc<dyn IdentityProvider>,
        app_redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            service,
            identity,
            app_redirect_url: app_redirect_url.into(),
        }
    }
}
