//! Named pool of agent connections.
//!
//! Each entry owns one agent subprocess plus the plumbing around it: the
//! local callback handler with its terminal manager, the
//! [`CallbackRouter`], and a pre-created [`Gateway`] so a peer can attach
//! later without re-initializing the agent.
//!
//! [`ConnectionManager::connect`] reserves the name, runs
//! spawn → initialize → new session, and rolls the entry back on any
//! failure, so a name either maps to a fully established connection or
//! to nothing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use crate::acp::types::{NewSessionRequest, NewSessionResponse};
use crate::audit::{ActivityRecorder, ToolCallObserver};
use crate::connection::{Connection, SpawnOptions};
use crate::gateway::Gateway;
use crate::handler::ClientCallbackHandler;
use crate::local::LocalCallbackHandler;
use crate::policy::{PermissionsConfig, PolicyEnforcer};
use crate::router::CallbackRouter;
use crate::terminal::{TerminalManager, DEFAULT_OUTPUT_BYTE_LIMIT, KILL_GRACE};
use crate::{AppError, Result};

/// Everything needed to establish one named connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// How to launch the agent subprocess.
    pub spawn: SpawnOptions,
    /// Working directory for the primary session.
    pub session_cwd: PathBuf,
    /// MCP server descriptors passed through to the agent.
    pub mcp_servers: Vec<Value>,
    /// Auto-approve permission requests that end up handled locally.
    pub auto_approve: bool,
    /// Permission rules evaluated before any request is routed.
    pub permission_policy: Option<PermissionsConfig>,
}

impl ConnectOptions {
    /// Options for a bare command with the session rooted at `cwd`.
    #[must_use]
    pub fn new(spawn: SpawnOptions, session_cwd: impl Into<PathBuf>) -> Self {
        Self {
            spawn,
            session_cwd: session_cwd.into(),
            mcp_servers: Vec::new(),
            auto_approve: false,
            permission_policy: None,
        }
    }
}

/// One established connection and its surrounding plumbing.
struct ManagedEntry {
    connection: Arc<Connection>,
    router: Arc<CallbackRouter>,
    gateway: Arc<Gateway>,
    terminals: Arc<TerminalManager>,
    session_id: Mutex<Option<String>>,
}

/// Pool of agent connections keyed by name.
pub struct ConnectionManager {
    entries: Mutex<HashMap<String, Arc<ManagedEntry>>>,
    terminal_byte_limit: u64,
    terminal_kill_grace: Duration,
    recorder: Option<Arc<dyn ActivityRecorder>>,
    known_tool_names: Vec<String>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// An empty pool with default terminal limits and no recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            terminal_byte_limit: DEFAULT_OUTPUT_BYTE_LIMIT,
            terminal_kill_grace: KILL_GRACE,
            recorder: None,
            known_tool_names: Vec::new(),
        }
    }

    /// Override the terminal output cap and kill grace applied to every
    /// connection's terminal manager.
    #[must_use]
    pub fn with_terminal_limits(mut self, byte_limit: u64, kill_grace: Duration) -> Self {
        self.terminal_byte_limit = byte_limit;
        self.terminal_kill_grace = kill_grace;
        self
    }

    /// Record observed tool calls matching `known_tool_names` through
    /// `recorder`.
    #[must_use]
    pub fn with_activity_recorder(
        mut self,
        recorder: Arc<dyn ActivityRecorder>,
        known_tool_names: Vec<String>,
    ) -> Self {
        self.recorder = Some(recorder);
        self.known_tool_names = known_tool_names;
        self
    }

    /// Spawn an agent, run the handshake, and create its primary session.
    ///
    /// # Errors
    ///
    /// - [`AppError::Conflict`] — a connection with this name already
    ///   exists.
    /// - [`AppError::Acp`] — spawn, handshake, or session creation failed;
    ///   the entry is rolled back and the subprocess closed.
    pub async fn connect(&self, name: &str, options: ConnectOptions) -> Result<NewSessionResponse> {
        let entry = {
            let mut entries = self.lock_entries()?;
            if entries.contains_key(name) {
                return Err(AppError::Conflict(format!(
                    "connection \"{name}\" already exists"
                )));
            }

            let terminals = Arc::new(TerminalManager::with_limits(
                self.terminal_byte_limit,
                self.terminal_kill_grace,
            ));
            let local = Arc::new(LocalCallbackHandler::new(
                Arc::clone(&terminals),
                options.auto_approve,
            ));
            let router = Arc::new(CallbackRouter::new(local as Arc<dyn ClientCallbackHandler>));
            if let Some(policy) = options.permission_policy.clone() {
                router.set_enforcer(Some(PolicyEnforcer::new(policy)));
            }
            if let Some(recorder) = &self.recorder {
                router.set_observer(Some(Arc::new(ToolCallObserver::new(
                    &self.known_tool_names,
                    Some(Arc::clone(recorder)),
                    name,
                ))));
            }

            let connection = Arc::new(Connection::spawn(
                name,
                &options.spawn,
                Arc::clone(&router) as Arc<dyn ClientCallbackHandler>,
            )?);
            let gateway = Arc::new(Gateway::new(
                name,
                Arc::clone(&connection),
                Arc::clone(&router),
            ));

            let entry = Arc::new(ManagedEntry {
                connection,
                router,
                gateway,
                terminals,
                session_id: Mutex::new(None),
            });
            entries.insert(name.to_owned(), Arc::clone(&entry));
            entry
        };

        let established = async {
            entry.connection.initialize().await?;
            let request = NewSessionRequest {
                cwd: options.session_cwd.display().to_string(),
                mcp_servers: options.mcp_servers.clone(),
            };
            entry.connection.new_session(&request).await
        }
        .await;

        match established {
            Ok(session) => {
                if let Ok(mut guard) = entry.session_id.lock() {
                    *guard = Some(session.session_id.clone());
                }
                info!(
                    name,
                    session_id = %session.session_id,
                    "agent connected, gateway ready"
                );
                Ok(session)
            }
            Err(err) => {
                // Roll back: the name must not keep a half-dead entry.
                entry.connection.close().await;
                entry.terminals.dispose_all();
                if let Ok(mut entries) = self.lock_entries() {
                    entries.remove(name);
                }
                Err(err)
            }
        }
    }

    /// Attach a peer transport to the named connection's gateway.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] — no such connection.
    /// - [`AppError::Conflict`] — the gateway already has a live peer.
    pub fn accept_lease<S>(&self, name: &str, transport: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let gateway = self
            .get_gateway(name)
            .ok_or_else(|| AppError::NotFound(format!("no gateway for connection \"{name}\"")))?;
        gateway.accept(transport)
    }

    /// Disconnect the peer from the named connection's gateway, if any.
    pub fn disconnect_lease(&self, name: &str) {
        if let Some(gateway) = self.get_gateway(name) {
            gateway.disconnect_upstream();
        }
    }

    /// The named connection, if present.
    #[must_use]
    pub fn get_connection(&self, name: &str) -> Option<Arc<Connection>> {
        self.entry(name).map(|e| Arc::clone(&e.connection))
    }

    /// The named connection's callback router, if present.
    #[must_use]
    pub fn get_router(&self, name: &str) -> Option<Arc<CallbackRouter>> {
        self.entry(name).map(|e| Arc::clone(&e.router))
    }

    /// The named connection's gateway, if present.
    #[must_use]
    pub fn get_gateway(&self, name: &str) -> Option<Arc<Gateway>> {
        self.entry(name).map(|e| Arc::clone(&e.gateway))
    }

    /// The primary session id created at connect time.
    #[must_use]
    pub fn get_primary_session_id(&self, name: &str) -> Option<String> {
        self.entry(name)
            .and_then(|e| e.session_id.lock().ok().and_then(|guard| guard.clone()))
    }

    /// Whether the named connection exists and its subprocess link is
    /// still usable.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.entry(name).is_some_and(|e| e.connection.is_live())
    }

    /// Replace the permission policy of a live connection.
    pub fn update_permission_policy(&self, name: &str, config: PermissionsConfig) {
        if let Some(entry) = self.entry(name) {
            entry.router.set_enforcer(Some(PolicyEnforcer::new(config)));
        }
    }

    /// Tear down one connection: detach its peer, close the subprocess,
    /// and kill any terminals it still owns.
    pub async fn disconnect(&self, name: &str) {
        let entry = self
            .lock_entries()
            .ok()
            .and_then(|mut entries| entries.remove(name));
        let Some(entry) = entry else {
            return;
        };

        entry.gateway.disconnect_upstream();
        entry.connection.close().await;
        entry.terminals.dispose_all();
        info!(name, "agent disconnected");
    }

    /// Tear down every connection concurrently.
    pub async fn dispose_all(&self) {
        let names: Vec<String> = self
            .lock_entries()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        let count = names.len();

        futures_util::future::join_all(names.iter().map(|name| self.disconnect(name))).await;
        info!(count, "all agent connections disposed");
    }

    fn entry(&self, name: &str) -> Option<Arc<ManagedEntry>> {
        self.lock_entries()
            .ok()
            .and_then(|entries| entries.get(name).cloned())
    }

    fn lock_entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<ManagedEntry>>>> {
        self.entries
            .lock()
            .map_err(|_| AppError::Acp("connection map mutex poisoned".into()))
    }
}
