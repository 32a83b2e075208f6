//! Persisted connection store.
//!
//! A client-side cache of each server's last known connection state, keyed
//! by server id. Records expire a fixed time after `connected_at`; expiry is
//! checked lazily and expired records are dropped when read.

use crate::error::ConnectionError;
use crate::events::{ConnectionEvent, ConnectionPhase};
use mcplink_core::ConnectionStatus;
use mcplink_mcp::{McpTool, TransportKind};
use mcplink_storage::Storage;
use mcplink_util::now_ms;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default retention of a connection record.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(12 * 60 * 60);

/// Cached summary of one server's connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub server_id: String,
    /// Empty until a session exists.
    #[serde(default)]
    pub session_id: String,
    pub server_name: String,
    pub connection_status: ConnectionStatus,
    #[serde(default)]
    pub tools: Vec<McpTool>,
    /// Milliseconds since the Unix epoch.
    pub connected_at: u64,
    #[serde(default)]
    pub transport: TransportKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionRecord {
    fn from_event(event: &ConnectionEvent, now: u64) -> Self {
        Self {
            server_id: event.server_id.clone(),
            session_id: String::new(),
            server_name: event.server_name.clone(),
            connection_status: event.phase.status(),
            tools: Vec::new(),
            connected_at: now,
            transport: event.transport,
            url: event.server_url.clone(),
            error: None,
        }
    }

    /// Whether the record has a session that can take calls.
    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected && !self.session_id.is_empty()
    }

    fn validate(&self) -> Result<(), ConnectionError> {
        if self.server_id.is_empty() {
            return Err(ConnectionError::InvalidRecord(
                "record has no server id".to_string(),
            ));
        }
        if self.connection_status == ConnectionStatus::Connected && self.session_id.is_empty() {
            return Err(ConnectionError::InvalidRecord(format!(
                "connected record for {} has no session id",
                self.server_id
            )));
        }
        Ok(())
    }
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Persisted connection store.
pub struct ConnectionStore<S: Storage> {
    storage: Arc<S>,
    retention: Duration,
    clock: Clock,
}

impl<S: Storage> Clone for ConnectionStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            retention: self.retention,
            clock: self.clock.clone(),
        }
    }
}

impl<S: Storage> ConnectionStore<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            retention: DEFAULT_RETENTION,
            clock: Arc::new(now_ms),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Replace the millisecond clock used for expiry.
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn is_expired(&self, record: &ConnectionRecord, now: u64) -> bool {
        let retention_ms = u64::try_from(self.retention.as_millis()).unwrap_or(u64::MAX);
        now.saturating_sub(record.connected_at) >= retention_ms
    }

    /// The record for `server_id`, unless missing or expired.
    pub async fn get(&self, server_id: &str) -> Result<Option<ConnectionRecord>, ConnectionError> {
        let Some(record) = self
            .storage
            .read::<ConnectionRecord>(&["connection", server_id])
            .await?
        else {
            return Ok(None);
        };

        if self.is_expired(&record, (self.clock)()) {
            debug!(server_id = %server_id, "Purging expired connection record");
            self.storage.remove(&["connection", server_id]).await?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Every unexpired record.
    pub async fn all(&self) -> Result<Vec<ConnectionRecord>, ConnectionError> {
        let keys = self.storage.list(&["connection"]).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(server_id) = key.last() {
                if let Some(record) = self.get(server_id).await? {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// The unexpired record for a server name.
    pub async fn find_by_server_name(
        &self,
        server_name: &str,
    ) -> Result<Option<ConnectionRecord>, ConnectionError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .find(|record| record.server_name == server_name))
    }

    /// Write a record. Connected records must carry a session id.
    pub async fn put(&self, record: &ConnectionRecord) -> Result<(), ConnectionError> {
        record.validate()?;
        self.storage
            .write(&["connection", &record.server_id], record)
            .await?;
        Ok(())
    }

    /// Merge a phase event into the server's record.
    ///
    /// A `connecting` event starts a fresh record; later phases update the
    /// status, session and error of the existing one.
    pub async fn apply(
        &self,
        event: &ConnectionEvent,
    ) -> Result<ConnectionRecord, ConnectionError> {
        let now = (self.clock)();
        let existing = if event.phase == ConnectionPhase::Connecting {
            None
        } else {
            self.get(&event.server_id).await?
        };
        let mut record = existing.unwrap_or_else(|| ConnectionRecord::from_event(event, now));

        record.connection_status = event.phase.status();
        record.server_name = event.server_name.clone();
        record.url = event.server_url.clone();
        record.transport = event.transport;
        if let Some(session_id) = &event.session_id {
            record.session_id = session_id.clone();
        }
        match event.phase {
            ConnectionPhase::Error => record.error = event.error.clone(),
            ConnectionPhase::Connected => {
                record.error = None;
                record.connected_at = now;
            }
            _ => {}
        }

        self.put(&record).await?;
        Ok(record)
    }

    /// Replace the cached tool list of a server.
    pub async fn set_tools(
        &self,
        server_id: &str,
        tools: Vec<McpTool>,
    ) -> Result<Option<ConnectionRecord>, ConnectionError> {
        let Some(mut record) = self.get(server_id).await? else {
            return Ok(None);
        };
        record.tools = tools;
        self.put(&record).await?;
        Ok(Some(record))
    }

    pub async fn remove(&self, server_id: &str) -> Result<(), ConnectionError> {
        self.storage.remove(&["connection", server_id]).await?;
        Ok(())
    }

    /// Drop the record(s) bound to a session. Returns whether any existed.
    pub async fn remove_session(&self, session_id: &str) -> Result<bool, ConnectionError> {
        let mut removed = false;
        for record in self.all().await? {
            if record.session_id == session_id {
                self.remove(&record.server_id).await?;
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Remove every expired record. Returns how many were dropped.
    pub async fn purge_expired(&self) -> Result<usize, ConnectionError> {
        let now = (self.clock)();
        let mut purged = 0;
        for key in self.storage.list(&["connection"]).await? {
            let Some(server_id) = key.last() else {
                continue;
            };
            let record: Option<ConnectionRecord> =
                self.storage.read(&["connection", server_id]).await?;
            if record.is_some_and(|r| self.is_expired(&r, now)) {
                self.storage.remove(&["connection", server_id]).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcplink_core::ServerTarget;
    use mcplink_storage::MemoryStorage;
    use std::sync::atomic::{AtomicU64, Ordering};

    const HOUR_MS: u64 = 60 * 60 * 1000;

    fn store_with_clock() -> (ConnectionStore<MemoryStorage>, Arc<AtomicU64>) {
        let clock = Arc::new(AtomicU64::new(1_700_000_000_000));
        let handle = clock.clone();
        let store = ConnectionStore::new(Arc::new(MemoryStorage::new()))
            .with_clock(move || handle.load(Ordering::SeqCst));
        (store, clock)
    }

    fn record(server_id: &str, session_id: &str, connected_at: u64) -> ConnectionRecord {
        ConnectionRecord {
            server_id: server_id.to_string(),
            session_id: session_id.to_string(),
            server_name: format!("name-{server_id}"),
            connection_status: ConnectionStatus::Connected,
            tools: vec![McpTool::named("search")],
            connected_at,
            transport: TransportKind::StreamableHttp,
            url: "https://ex.com/mcp".to_string(),
            error: None,
        }
    }

    fn target(server_id: &str) -> ServerTarget {
        ServerTarget {
            server_id: server_id.to_string(),
            server_name: format!("name-{server_id}"),
            server_url: "https://ex.com/mcp".to_string(),
            transport: TransportKind::StreamableHttp,
        }
    }

    #[tokio::test]
    async fn test_record_expires_after_retention() {
        let (store, clock) = store_with_clock();
        let start = clock.load(Ordering::SeqCst);

        store.put(&record("srv1", "s1", start)).await.unwrap();
        assert!(store.get("srv1").await.unwrap().is_some());

        // An unrelated record written later.
        clock.store(start + 6 * HOUR_MS, Ordering::SeqCst);
        store
            .put(&record("srv2", "s2", start + 6 * HOUR_MS))
            .await
            .unwrap();

        clock.store(start + 12 * HOUR_MS, Ordering::SeqCst);
        assert!(store.get("srv1").await.unwrap().is_none());
        assert_eq!(store.get("srv2").await.unwrap().unwrap().session_id, "s2");

        // The expired record was purged, not just hidden.
        clock.store(start, Ordering::SeqCst);
        assert!(store.get("srv1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connected_record_requires_session() {
        let (store, clock) = store_with_clock();
        let now = clock.load(Ordering::SeqCst);

        let err = store.put(&record("srv1", "", now)).await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidRecord(_)));
        assert!(store.get("srv1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_follows_phases() {
        let (store, _) = store_with_clock();
        let target = target("srv1");

        let record = store
            .apply(&ConnectionEvent::new(ConnectionPhase::Connecting, &target))
            .await
            .unwrap();
        assert_eq!(record.connection_status, ConnectionStatus::Connecting);
        assert!(record.session_id.is_empty());

        store
            .apply(
                &ConnectionEvent::new(ConnectionPhase::Authenticating, &target).with_session("s1"),
            )
            .await
            .unwrap();
        store
            .set_tools("srv1", vec![McpTool::named("search")])
            .await
            .unwrap();
        let record = store
            .apply(&ConnectionEvent::new(ConnectionPhase::Connected, &target).with_tool_count(1))
            .await
            .unwrap();
        assert_eq!(record.connection_status, ConnectionStatus::Connected);
        assert_eq!(record.session_id, "s1");
        assert_eq!(record.tools.len(), 1);

        let record = store
            .apply(
                &ConnectionEvent::new(ConnectionPhase::Error, &target)
                    .with_error("boom", ConnectionPhase::Discovering),
            )
            .await
            .unwrap();
        assert_eq!(record.connection_status, ConnectionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_find_and_remove_session() {
        let (store, clock) = store_with_clock();
        let now = clock.load(Ordering::SeqCst);
        store.put(&record("srv1", "s1", now)).await.unwrap();
        store.put(&record("srv2", "s2", now)).await.unwrap();

        let found = store.find_by_server_name("name-srv2").await.unwrap().unwrap();
        assert_eq!(found.server_id, "srv2");
        assert!(store.find_by_server_name("missing").await.unwrap().is_none());

        assert!(store.remove_session("s1").await.unwrap());
        assert!(!store.remove_session("s1").await.unwrap());
        assert!(store.get("srv1").await.unwrap().is_none());
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store_with_clock();
        let now = clock.load(Ordering::SeqCst);
        store.put(&record("old", "s1", now - 13 * HOUR_MS)).await.unwrap();
        store.put(&record("new", "s2", now)).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert!(store.get("new").await.unwrap().is_some());
    }
}
