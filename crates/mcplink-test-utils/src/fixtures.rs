//! Pre-built test data.

use crate::mocks::{MockAuthorizationServer, MockClientFactory, MockTransport};
use mcplink_core::{ServerTarget, SessionService, SessionStore};
use mcplink_mcp::{McpSessionClient, OAuthConfig, SessionClientConfig, TransportKind};
use mcplink_storage::{MemoryStorage, Storage};
use std::sync::Arc;

/// URL used for mock tool servers.
pub fn server_url(server_name: &str) -> String {
    format!("https://{server_name}.mcp.test/mcp")
}

/// Client config for a session against a mock server.
pub fn session_config(session_id: &str, server_name: &str) -> SessionClientConfig {
    SessionClientConfig {
        session_id: session_id.to_string(),
        server_name: server_name.to_string(),
        server_url: server_url(server_name),
        transport_kind: TransportKind::StreamableHttp,
        oauth: OAuthConfig::default(),
    }
}

/// A session client wired to the given mocks.
pub fn session_client(
    session_id: &str,
    server_name: &str,
    transport: &MockTransport,
    auth: &MockAuthorizationServer,
) -> McpSessionClient {
    McpSessionClient::new(
        session_config(session_id, server_name),
        Arc::new(transport.clone()),
        Arc::new(auth.clone()),
    )
}

/// Connect request for a mock server.
pub fn server_target(server_id: &str, server_name: &str) -> ServerTarget {
    ServerTarget {
        server_id: server_id.to_string(),
        server_name: server_name.to_string(),
        server_url: server_url(server_name),
        transport: TransportKind::StreamableHttp,
    }
}

/// A session service over in-memory storage. The storage handle is returned
/// so tests can take it offline.
pub fn memory_service(
    factory: &MockClientFactory,
) -> (SessionService<MemoryStorage>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let store = Arc::new(SessionStore::new(storage.clone()));
    let service = SessionService::new(store, Arc::new(factory.clone()));
    (service, storage)
}

/// A session service over the given storage.
pub fn service_over<S: Storage>(
    factory: &MockClientFactory,
    storage: Arc<S>,
) -> SessionService<S> {
    SessionService::new(
        Arc::new(SessionStore::new(storage)),
        Arc::new(factory.clone()),
    )
}

/// Extract a query parameter from a URL.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
