//! Session store.
//!
//! Live protocol clients are process-local; session metadata and the
//! per-user and per-server indices are written through to a `Storage`
//! backend so every server process sees the same sessions.
//!
//! Storage layout:
//! - `["session", session_id]` -> `SessionRecord`
//! - `["user", user_id, session_id]` -> index entry
//! - `["server", server_name]` -> index entry naming the latest session

use crate::error::{SessionError, SessionResult};
use crate::session::{ConnectionStatus, SessionRecord, SessionSummary};
use mcplink_mcp::{McpSessionClient, StoredTokens};
use mcplink_storage::Storage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    session_id: String,
}

/// A live session: its protocol client and the locks guarding it.
pub struct SessionSlot {
    session_id: String,
    client: Mutex<McpSessionClient>,
    record_lock: Mutex<()>,
    removed: AtomicBool,
}

impl fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSlot")
            .field("session_id", &self.session_id)
            .field("removed", &self.removed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Shared handle to a live session.
pub type SessionHandle = Arc<SessionSlot>;

impl SessionSlot {
    fn new(session_id: String, client: McpSessionClient) -> Self {
        Self {
            session_id,
            client: Mutex::new(client),
            record_lock: Mutex::new(()),
            removed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Lock the client for one operation. Calls on the same session run one
    /// at a time; `None` once the session has been removed.
    pub async fn lock(&self) -> Option<MutexGuard<'_, McpSessionClient>> {
        let guard = self.client.lock().await;
        if self.removed.load(Ordering::SeqCst) {
            None
        } else {
            Some(guard)
        }
    }
}

/// Session store.
pub struct SessionStore<S: Storage> {
    storage: Arc<S>,
    slots: RwLock<HashMap<String, SessionHandle>>,
}

impl<S: Storage> SessionStore<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// The live session with this id. No side effects.
    pub async fn get_client(&self, session_id: &str) -> Option<SessionHandle> {
        self.slots.read().await.get(session_id).cloned()
    }

    /// Number of live sessions in this process.
    pub async fn live_count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Register a new session with its client.
    pub async fn insert(
        &self,
        record: SessionRecord,
        client: McpSessionClient,
    ) -> SessionResult<SessionHandle> {
        let session_id = record.session_id.clone();
        if self.storage.exists(&["session", &session_id]).await? {
            return Err(SessionError::AlreadyExists { id: session_id });
        }

        let slot = Arc::new(SessionSlot::new(session_id.clone(), client));
        {
            let mut slots = self.slots.write().await;
            if slots.contains_key(&session_id) {
                return Err(SessionError::AlreadyExists { id: session_id });
            }
            slots.insert(session_id.clone(), slot.clone());
        }

        if let Err(e) = self.write_record(&record).await {
            self.slots.write().await.remove(&session_id);
            return Err(e);
        }

        debug!(session_id = %session_id, server = %record.server_name, "Session stored");
        Ok(slot)
    }

    async fn write_record(&self, record: &SessionRecord) -> SessionResult<()> {
        self.storage
            .write(&["session", &record.session_id], record)
            .await?;
        self.storage
            .write(
                &["user", &record.user_id, &record.session_id],
                &IndexEntry {
                    session_id: record.session_id.clone(),
                },
            )
            .await?;
        Ok(())
    }

    /// Session metadata.
    pub async fn get_record(&self, session_id: &str) -> SessionResult<Option<SessionRecord>> {
        Ok(self.storage.read(&["session", session_id]).await?)
    }

    /// Point the server-name index at a session.
    pub async fn set_server_session(
        &self,
        server_name: &str,
        session_id: &str,
    ) -> SessionResult<()> {
        self.storage
            .write(
                &["server", server_name],
                &IndexEntry {
                    session_id: session_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// The session most recently bound to a server name.
    pub async fn get_server_session(&self, server_name: &str) -> SessionResult<Option<String>> {
        let entry: Option<IndexEntry> = self.storage.read(&["server", server_name]).await?;
        Ok(entry.map(|e| e.session_id))
    }

    /// Summaries of one user's sessions, oldest first.
    pub async fn get_user_sessions_data(
        &self,
        user_id: &str,
    ) -> SessionResult<Vec<SessionSummary>> {
        let keys = self.storage.list(&["user", user_id]).await?;
        let mut sessions = Vec::with_capacity(keys.len());

        for key in keys {
            let Some(session_id) = key.last() else {
                continue;
            };
            match self.get_record(session_id).await? {
                Some(record) if record.user_id == user_id => sessions.push(record.summary()),
                Some(_) => {}
                None => debug!(session_id = %session_id, "Dangling user index entry"),
            }
        }

        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    /// Every stored session record.
    pub async fn all_records(&self) -> SessionResult<Vec<SessionRecord>> {
        let keys = self.storage.list(&["session"]).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(session_id) = key.last() {
                if let Some(record) = self.get_record(session_id).await? {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Replace a session's token state. Leaves status and tools alone.
    ///
    /// Only the process holding the live session may update it.
    pub async fn update_tokens(
        &self,
        session_id: &str,
        tokens: Option<StoredTokens>,
    ) -> SessionResult<SessionRecord> {
        self.update_record(session_id, |record| record.tokens = tokens)
            .await
    }

    /// Set a session's connection status (and with it, `active`).
    pub async fn mark_active(
        &self,
        session_id: &str,
        status: ConnectionStatus,
    ) -> SessionResult<SessionRecord> {
        self.update_record(session_id, |record| record.set_status(status))
            .await
    }

    async fn update_record<F>(&self, session_id: &str, editor: F) -> SessionResult<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let slot = self
            .get_client(session_id)
            .await
            .ok_or_else(|| SessionError::not_found(session_id))?;
        let _guard = slot.record_lock.lock().await;
        // Removed while we waited; writing now would resurrect the record.
        if slot.removed.load(Ordering::SeqCst) {
            return Err(SessionError::not_found(session_id));
        }

        let mut record = self
            .get_record(session_id)
            .await?
            .ok_or_else(|| SessionError::not_found(session_id))?;
        editor(&mut record);
        self.storage
            .write(&["session", session_id], &record)
            .await?;
        Ok(record)
    }

    /// Remove a session: wait for an in-flight call, close the transport and
    /// delete every index entry. Returns `false` when nothing was found.
    pub async fn remove_session(&self, session_id: &str) -> SessionResult<bool> {
        let slot = self.slots.write().await.remove(session_id);
        let had_slot = slot.is_some();

        let _record_guard = match &slot {
            Some(slot) => {
                slot.removed.store(true, Ordering::SeqCst);
                {
                    let client = slot.client.lock().await;
                    if let Err(e) = client.close().await {
                        warn!(session_id = %session_id, error = %e, "Error closing transport");
                    }
                }
                Some(slot.record_lock.lock().await)
            }
            None => None,
        };

        let Some(record) = self.get_record(session_id).await? else {
            return Ok(had_slot);
        };

        self.storage
            .remove(&["user", &record.user_id, session_id])
            .await?;
        if self.get_server_session(&record.server_name).await?.as_deref() == Some(session_id) {
            self.storage.remove(&["server", &record.server_name]).await?;
        }
        self.storage.remove(&["session", session_id]).await?;

        info!(session_id = %session_id, server = %record.server_name, "Session removed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ServerTarget;
    use mcplink_mcp::{
        AuthServerMetadata, AuthorizationServer, ClientInfo, McpResult, OAuthConfig, OAuthTokens,
        RegistrationRequest, SessionClientConfig, Transport, TransportKind,
    };
    use mcplink_mcp::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
    use mcplink_storage::MemoryStorage;
    use std::time::Duration;

    struct ClosedTransport;

    #[async_trait::async_trait]
    impl Transport for ClosedTransport {
        async fn request(&self, _request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
            Err(mcplink_mcp::McpError::connection_failed("closed"))
        }
        async fn notify(&self, _notification: JsonRpcNotification) -> McpResult<()> {
            Ok(())
        }
        async fn set_auth_token(&self, _token: Option<String>) {}
        async fn close(&self) -> McpResult<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            false
        }
    }

    struct NoAuth;

    #[async_trait::async_trait]
    impl AuthorizationServer for NoAuth {
        async fn metadata(&self, server_url: &str) -> McpResult<AuthServerMetadata> {
            AuthServerMetadata::fallback(server_url)
        }
        async fn register(
            &self,
            _metadata: &AuthServerMetadata,
            _request: &RegistrationRequest,
        ) -> McpResult<ClientInfo> {
            Err(mcplink_mcp::McpError::auth_failed("unsupported"))
        }
        async fn exchange_code(
            &self,
            _metadata: &AuthServerMetadata,
            _client: &ClientInfo,
            _code: &str,
            _redirect_uri: &str,
            _code_verifier: &str,
        ) -> McpResult<OAuthTokens> {
            Err(mcplink_mcp::McpError::auth_failed("unsupported"))
        }
        async fn refresh(
            &self,
            _metadata: &AuthServerMetadata,
            _client: &ClientInfo,
            _refresh_token: &str,
        ) -> McpResult<OAuthTokens> {
            Err(mcplink_mcp::McpError::auth_failed("unsupported"))
        }
    }

    fn client(session_id: &str) -> McpSessionClient {
        McpSessionClient::new(
            SessionClientConfig {
                session_id: session_id.to_string(),
                server_name: "github".to_string(),
                server_url: "https://github.mcp.test/mcp".to_string(),
                transport_kind: TransportKind::StreamableHttp,
                oauth: OAuthConfig::default(),
            },
            Arc::new(ClosedTransport),
            Arc::new(NoAuth),
        )
    }

    fn record(session_id: &str, user_id: &str) -> SessionRecord {
        SessionRecord::new(
            session_id.to_string(),
            user_id.to_string(),
            &ServerTarget {
                server_id: "srv-1".to_string(),
                server_name: "github".to_string(),
                server_url: "https://github.mcp.test/mcp".to_string(),
                transport: TransportKind::StreamableHttp,
            },
        )
    }

    fn store() -> (SessionStore<MemoryStorage>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (SessionStore::new(storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (store, _) = store();
        store.insert(record("s1", "alice"), client("s1")).await.unwrap();

        let handle = store.get_client("s1").await.unwrap();
        assert_eq!(handle.session_id(), "s1");
        assert!(store.get_client("s2").await.is_none());
        assert_eq!(store.get_record("s1").await.unwrap().unwrap().user_id, "alice");
    }

    #[tokio::test]
    async fn test_insert_duplicate_fails() {
        let (store, _) = store();
        store.insert(record("s1", "alice"), client("s1")).await.unwrap();
        let err = store
            .insert(record("s1", "alice"), client("s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_user_sessions_are_isolated() {
        let (store, _) = store();
        store.insert(record("s1", "alice"), client("s1")).await.unwrap();
        store.insert(record("s2", "bob"), client("s2")).await.unwrap();
        store.insert(record("s3", "alice"), client("s3")).await.unwrap();

        let alice: Vec<_> = store
            .get_user_sessions_data("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(alice.len(), 2);
        assert!(alice.contains(&"s1".to_string()));
        assert!(alice.contains(&"s3".to_string()));
        assert!(store.get_user_sessions_data("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_twice_reports_not_found() {
        let (store, _) = store();
        store.insert(record("s1", "alice"), client("s1")).await.unwrap();
        store.set_server_session("github", "s1").await.unwrap();

        assert!(store.remove_session("s1").await.unwrap());
        assert!(!store.remove_session("s1").await.unwrap());

        assert!(store.get_client("s1").await.is_none());
        assert!(store.get_record("s1").await.unwrap().is_none());
        assert!(store.get_server_session("github").await.unwrap().is_none());
        assert!(store.get_user_sessions_data("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_keeps_server_index_of_newer_session() {
        let (store, _) = store();
        store.insert(record("s1", "alice"), client("s1")).await.unwrap();
        store.insert(record("s2", "alice"), client("s2")).await.unwrap();
        store.set_server_session("github", "s2").await.unwrap();

        assert!(store.remove_session("s1").await.unwrap());
        assert_eq!(
            store.get_server_session("github").await.unwrap().as_deref(),
            Some("s2")
        );
    }

    #[tokio::test]
    async fn test_removed_slot_refuses_lock() {
        let (store, _) = store();
        let handle = store.insert(record("s1", "alice"), client("s1")).await.unwrap();
        assert!(handle.lock().await.is_some());

        store.remove_session("s1").await.unwrap();
        assert!(handle.lock().await.is_none());
    }

    #[test]
    fn test_slot_debug_shows_session_id() {
        let slot = SessionSlot::new("s1".to_string(), client("s1"));
        let debug = format!("{slot:?}");
        assert!(debug.contains("\"s1\""));
        assert!(debug.contains("removed: false"));
    }

    #[tokio::test]
    async fn test_update_tokens_and_status() {
        let (store, _) = store();
        store.insert(record("s1", "alice"), client("s1")).await.unwrap();

        let tokens = StoredTokens {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_at: Some(100),
            scope: None,
        };
        let updated = store.update_tokens("s1", Some(tokens.clone())).await.unwrap();
        assert_eq!(updated.tokens, Some(tokens));
        assert!(!updated.active);

        let updated = store
            .mark_active("s1", ConnectionStatus::Connected)
            .await
            .unwrap();
        assert!(updated.active);
        assert!(updated.tokens.is_some());

        assert!(matches!(
            store.update_tokens("missing", None).await,
            Err(SessionError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_racing_removal_leaves_no_record() {
        let (store, _) = store();
        let handle = store.insert(record("s1", "alice"), client("s1")).await.unwrap();
        let store = Arc::new(store);

        // An in-flight metadata edit holds the record lock.
        let held = handle.record_lock.lock().await;
        let update = tokio::spawn({
            let store = store.clone();
            async move { store.mark_active("s1", ConnectionStatus::Connected).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let removal = tokio::spawn({
            let store = store.clone();
            async move { store.remove_session("s1").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Removal waits for the lock before deleting metadata.
        assert!(store.get_record("s1").await.unwrap().is_some());
        drop(held);

        assert!(matches!(
            update.await.unwrap(),
            Err(SessionError::NotFound { .. })
        ));
        assert!(removal.await.unwrap().unwrap());
        assert!(store.get_record("s1").await.unwrap().is_none());
        assert!(store.get_user_sessions_data("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_without_live_session_is_not_found() {
        let (store, _) = store();
        store.insert(record("s1", "alice"), client("s1")).await.unwrap();
        store.remove_session("s1").await.unwrap();

        assert!(matches!(
            store.update_tokens("s1", None).await,
            Err(SessionError::NotFound { .. })
        ));
        assert!(store.get_record("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_storage_failure_is_store_unavailable() {
        let (store, storage) = store();
        store.insert(record("s1", "alice"), client("s1")).await.unwrap();

        storage.set_offline(true);
        assert!(matches!(
            store.get_user_sessions_data("alice").await,
            Err(SessionError::StoreUnavailable(_))
        ));
        assert!(matches!(
            store.insert(record("s2", "alice"), client("s2")).await,
            Err(SessionError::StoreUnavailable(_))
        ));
        // A failed insert leaves no live slot behind.
        assert!(store.get_client("s2").await.is_none());
    }
}
