//! Connection-state observable.
//!
//! `ConnectionManager` drives connection attempts through their phases and
//! publishes every transition. At most one attempt runs per server id: a
//! second `connect` while one is in flight joins it instead of starting
//! another. Each attempt carries a token; events from an attempt that is no
//! longer current (cancelled or finished) are discarded.

use crate::backend::BackendApi;
use crate::error::{ConnectionError, GatewayError};
use crate::events::{ConnectionEvent, ConnectionPhase, EventKind};
use crate::gateway::SessionGateway;
use crate::store::ConnectionStore;
use futures::future::{BoxFuture, FutureExt, Shared};
use mcplink_core::ServerTarget;
use mcplink_mcp::McpTool;
use mcplink_storage::Storage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Capacity of the broadcast channel behind `subscribe`.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Callback registered with `ConnectionManager::on`.
pub type EventHandler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Identifies a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Result of a connection attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    /// The session is connected and its tools are known.
    Connected {
        session_id: String,
        tools: Vec<McpTool>,
    },
    /// The user must authorize; `resume` finishes the attempt afterwards.
    RequiresAuth {
        session_id: String,
        authorization_url: String,
    },
}

impl ConnectOutcome {
    pub fn session_id(&self) -> &str {
        match self {
            ConnectOutcome::Connected { session_id, .. }
            | ConnectOutcome::RequiresAuth { session_id, .. } => session_id,
        }
    }
}

type AttemptFuture = Shared<BoxFuture<'static, Result<ConnectOutcome, ConnectionError>>>;

struct Attempt {
    token: u64,
    future: AttemptFuture,
}

struct ManagerInner<S: Storage> {
    gateway: Arc<dyn SessionGateway>,
    backend: Option<Arc<dyn BackendApi>>,
    store: ConnectionStore<S>,
    attempts: Mutex<HashMap<String, Attempt>>,
    next_token: AtomicU64,
    handlers: RwLock<Vec<(HandlerId, EventKind, EventHandler)>>,
    next_handler: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
}

/// Connection-state observable. Clones share state.
pub struct ConnectionManager<S: Storage> {
    inner: Arc<ManagerInner<S>>,
}

impl<S: Storage> Clone for ConnectionManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Storage + 'static> ConnectionManager<S> {
    pub fn new(gateway: Arc<dyn SessionGateway>, store: ConnectionStore<S>) -> Self {
        Self::build(gateway, store, None)
    }

    /// A manager that can also enable, disable and restart servers.
    pub fn with_backend(
        gateway: Arc<dyn SessionGateway>,
        store: ConnectionStore<S>,
        backend: Arc<dyn BackendApi>,
    ) -> Self {
        Self::build(gateway, store, Some(backend))
    }

    fn build(
        gateway: Arc<dyn SessionGateway>,
        store: ConnectionStore<S>,
        backend: Option<Arc<dyn BackendApi>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                gateway,
                backend,
                store,
                attempts: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
                handlers: RwLock::new(Vec::new()),
                next_handler: AtomicU64::new(1),
                events,
            }),
        }
    }

    pub fn store(&self) -> &ConnectionStore<S> {
        &self.inner.store
    }

    pub fn gateway(&self) -> &Arc<dyn SessionGateway> {
        &self.inner.gateway
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Register a handler for one phase, or for every event with
    /// `EventKind::All`.
    pub fn on<F>(&self, kind: impl Into<EventKind>, handler: F) -> HandlerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.inner.next_handler.fetch_add(1, Ordering::SeqCst));
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, kind.into(), Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was registered for `kind`.
    pub fn off(&self, kind: impl Into<EventKind>, id: HandlerId) -> bool {
        let kind = kind.into();
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(hid, hkind, _)| !(*hid == id && *hkind == kind));
        handlers.len() != before
    }

    /// Receive every delivered event on a channel.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    fn deliver(&self, event: &ConnectionEvent) {
        let matching: Vec<EventHandler> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, kind, _)| event.matches(*kind))
            .map(|(_, _, handler)| handler.clone())
            .collect();

        for handler in matching {
            handler(event);
        }
        // No subscribers is fine.
        let _ = self.inner.events.send(event.clone());
    }

    // =========================================================================
    // Attempts
    // =========================================================================

    /// Connect to a server, joining the attempt already in flight for the
    /// same server id if there is one.
    pub async fn connect(&self, target: ServerTarget) -> Result<ConnectOutcome, ConnectionError> {
        self.run(target, None).await
    }

    /// Continue an attempt after the user authorized `session_id`:
    /// `authenticated`, `discovering`, `connected`.
    pub async fn resume(
        &self,
        target: ServerTarget,
        session_id: impl Into<String>,
    ) -> Result<ConnectOutcome, ConnectionError> {
        self.run(target, Some(session_id.into())).await
    }

    /// Stop tracking the attempt for `server_id`. The remote side is not
    /// told; events the attempt still produces are dropped.
    pub async fn cancel_connection(&self, server_id: &str) -> bool {
        let cancelled = self.inner.attempts.lock().await.remove(server_id).is_some();
        if cancelled {
            info!(server_id = %server_id, "Connection attempt cancelled");
        }
        cancelled
    }

    /// Whether an attempt is in flight for `server_id`.
    pub async fn is_connecting(&self, server_id: &str) -> bool {
        self.inner.attempts.lock().await.contains_key(server_id)
    }

    async fn run(
        &self,
        target: ServerTarget,
        resume: Option<String>,
    ) -> Result<ConnectOutcome, ConnectionError> {
        let server_id = target.server_id.clone();

        let (token, future) = {
            let mut attempts = self.inner.attempts.lock().await;
            let existing = attempts
                .get(&server_id)
                .map(|attempt| (attempt.token, attempt.future.clone()));

            match existing {
                Some(existing) => {
                    debug!(server_id = %server_id, "Joining in-flight connection attempt");
                    existing
                }
                None => {
                    let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
                    let this = self.clone();
                    let future = async move { this.drive(target, resume, token).await }
                        .boxed()
                        .shared();
                    attempts.insert(
                        server_id.clone(),
                        Attempt {
                            token,
                            future: future.clone(),
                        },
                    );
                    (token, future)
                }
            }
        };

        let result = future.await;

        let mut attempts = self.inner.attempts.lock().await;
        if attempts.get(&server_id).is_some_and(|a| a.token == token) {
            attempts.remove(&server_id);
        }
        result
    }

    async fn is_current(&self, server_id: &str, token: u64) -> bool {
        self.inner
            .attempts
            .lock()
            .await
            .get(server_id)
            .is_some_and(|attempt| attempt.token == token)
    }

    async fn drive(
        &self,
        target: ServerTarget,
        resume: Option<String>,
        token: u64,
    ) -> Result<ConnectOutcome, ConnectionError> {
        let result = match resume {
            None => self.open(&target, token).await,
            Some(session_id) => {
                self.emit(
                    token,
                    ConnectionEvent::new(ConnectionPhase::Authenticated, &target)
                        .with_session(&session_id),
                )
                .await;
                self.discover(&target, session_id, token).await
            }
        };

        if self.is_current(&target.server_id, token).await {
            result
        } else {
            Err(ConnectionError::Cancelled {
                server_id: target.server_id,
            })
        }
    }

    async fn open(
        &self,
        target: &ServerTarget,
        token: u64,
    ) -> Result<ConnectOutcome, ConnectionError> {
        self.emit(
            token,
            ConnectionEvent::new(ConnectionPhase::Connecting, target),
        )
        .await;

        let response = match self.inner.gateway.open(target).await {
            Ok(response) => response,
            Err(e) => {
                return Err(self
                    .fail(token, target, None, ConnectionPhase::Connecting, e)
                    .await)
            }
        };
        let session_id = response.session_id;

        let mut event = ConnectionEvent::new(ConnectionPhase::Authenticating, target)
            .with_session(&session_id);
        if let Some(url) = &response.authorization_url {
            event = event.with_authorization_url(url);
        }
        self.emit(token, event).await;

        if response.requires_auth {
            let Some(authorization_url) = response.authorization_url else {
                let err = GatewayError::AuthorizationRequired(
                    "Server requires authorization but sent no authorization URL".to_string(),
                );
                let phase = ConnectionPhase::Authenticating;
                return Err(self
                    .fail(token, target, Some(&session_id), phase, err)
                    .await);
            };
            info!(
                server_id = %target.server_id,
                session_id = %session_id,
                "Authorization required"
            );
            return Ok(ConnectOutcome::RequiresAuth {
                session_id,
                authorization_url,
            });
        }

        self.emit(
            token,
            ConnectionEvent::new(ConnectionPhase::Authenticated, target).with_session(&session_id),
        )
        .await;
        self.discover(target, session_id, token).await
    }

    async fn discover(
        &self,
        target: &ServerTarget,
        session_id: String,
        token: u64,
    ) -> Result<ConnectOutcome, ConnectionError> {
        self.emit(
            token,
            ConnectionEvent::new(ConnectionPhase::Discovering, target).with_session(&session_id),
        )
        .await;

        let tools = match self.inner.gateway.list_tools(&session_id).await {
            Ok(tools) => tools,
            Err(e) => {
                let phase = ConnectionPhase::Discovering;
                return Err(self.fail(token, target, Some(&session_id), phase, e).await);
            }
        };

        let tool_count = tools.len();
        self.emit_with_tools(
            token,
            ConnectionEvent::new(ConnectionPhase::Connected, target)
                .with_session(&session_id)
                .with_tool_count(tool_count),
            Some(tools.clone()),
        )
        .await;

        info!(
            server_id = %target.server_id,
            session_id = %session_id,
            tools = tools.len(),
            "Connected"
        );
        Ok(ConnectOutcome::Connected { session_id, tools })
    }

    async fn fail(
        &self,
        token: u64,
        target: &ServerTarget,
        session_id: Option<&str>,
        phase: ConnectionPhase,
        err: GatewayError,
    ) -> ConnectionError {
        let error = ConnectionError::gateway(phase, err);
        warn!(server_id = %target.server_id, %phase, error = %error, "Connection attempt failed");

        let mut event = ConnectionEvent::new(ConnectionPhase::Error, target)
            .with_error(error.user_message(), phase);
        if let Some(session_id) = session_id {
            event = event.with_session(session_id);
        }
        self.emit(token, event).await;
        error
    }

    /// Mirror and deliver an event if its attempt is still current.
    async fn emit(&self, token: u64, event: ConnectionEvent) -> bool {
        self.emit_with_tools(token, event, None).await
    }

    /// Like `emit`, also caching `tools` on the record. The attempts lock is
    /// held until delivery finishes, so a cancellation either precedes the
    /// whole mirror-and-deliver step or follows it.
    async fn emit_with_tools(
        &self,
        token: u64,
        event: ConnectionEvent,
        tools: Option<Vec<McpTool>>,
    ) -> bool {
        let attempts = self.inner.attempts.lock().await;
        if !attempts
            .get(&event.server_id)
            .is_some_and(|attempt| attempt.token == token)
        {
            debug!(
                server_id = %event.server_id,
                phase = %event.phase,
                "Discarding event from a stale attempt"
            );
            return false;
        }

        if let Some(tools) = tools {
            if let Err(e) = self.inner.store.set_tools(&event.server_id, tools).await {
                warn!(server_id = %event.server_id, error = %e, "Failed to cache tools");
            }
        }
        if let Err(e) = self.inner.store.apply(&event).await {
            warn!(server_id = %event.server_id, error = %e, "Failed to mirror connection event");
        }
        self.deliver(&event);
        drop(attempts);
        true
    }

    // =========================================================================
    // Teardown and backend operations
    // =========================================================================

    /// Tear a session down and drop its local record. `false` when the
    /// service no longer knew the session.
    pub async fn disconnect(&self, session_id: &str) -> Result<bool, ConnectionError> {
        let removed = self
            .inner
            .gateway
            .disconnect(session_id)
            .await
            .map_err(|e| ConnectionError::Disconnect {
                source: Arc::new(e),
            })?;
        self.inner.store.remove_session(session_id).await?;
        info!(session_id = %session_id, removed, "Disconnected");
        Ok(removed)
    }

    async fn disconnect_server(&self, server_id: &str) -> Result<(), ConnectionError> {
        self.cancel_connection(server_id).await;
        if let Some(record) = self.inner.store.get(server_id).await? {
            if !record.session_id.is_empty() {
                self.disconnect(&record.session_id).await?;
            }
        }
        self.inner.store.remove(server_id).await
    }

    fn backend(&self) -> Result<Arc<dyn BackendApi>, ConnectionError> {
        self.inner
            .backend
            .clone()
            .ok_or_else(|| ConnectionError::Backend("no backend API configured".to_string()))
    }

    /// Enable or disable a server in the backend, then connect or tear down
    /// locally.
    pub async fn set_enabled(
        &self,
        target: ServerTarget,
        enabled: bool,
    ) -> Result<Option<ConnectOutcome>, ConnectionError> {
        self.backend()?
            .set_enabled(&target.server_name, enabled)
            .await?;
        if enabled {
            Ok(Some(self.connect(target).await?))
        } else {
            self.disconnect_server(&target.server_id).await?;
            Ok(None)
        }
    }

    /// Restart a server in the backend and reconnect to it.
    pub async fn restart(&self, target: ServerTarget) -> Result<ConnectOutcome, ConnectionError> {
        self.backend()?.restart(&target.server_name).await?;
        self.disconnect_server(&target.server_id).await?;
        self.connect(target).await
    }
}
