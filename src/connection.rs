//! One agent subprocess and its protocol client.
//!
//! [`Connection::spawn`] launches the agent binary with piped stdio and
//! drives JSON-RPC over stdin/stdout through an [`RpcPeer`]. Inbound
//! agent → client callbacks are served by the [`ClientCallbackHandler`]
//! the connection was built with; `session/update` notifications
//! additionally fan out to any [`PromptStream`] listening on the session.
//!
//! [`Connection::close`] is graceful-then-forced: it closes the agent's
//! stdin, waits up to the shutdown grace for the process to exit, and
//! kills it if the grace elapses. After close every in-flight request and
//! stream fails with the connection-closed error.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::acp::rpc::{RpcPeer, RpcService};
use crate::acp::types::{
    method, AuthenticateRequest, CancelNotification, ClientCapabilities, Implementation,
    InitializeRequest, InitializeResponse, LoadSessionRequest, NewSessionRequest,
    NewSessionResponse, PromptRequest, PromptResponse, SessionNotification, SessionUpdate,
    SetSessionConfigOptionRequest, SetSessionModeRequest, PROTOCOL_VERSION,
};
use crate::handler::ClientCallbackHandler;
use crate::{AppError, Result};

/// Default wait between closing the agent's stdin and force-killing it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(5000);

/// How to launch one agent subprocess.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Agent binary.
    pub command: String,
    /// Arguments passed to the binary.
    pub args: Vec<String>,
    /// Environment overrides merged over the inherited environment.
    pub env: HashMap<String, String>,
    /// Working directory for the subprocess.
    pub cwd: Option<PathBuf>,
    /// Grace window used by [`Connection::close`].
    pub shutdown_grace: Duration,
}

impl SpawnOptions {
    /// Options for a bare command with defaults everywhere else.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Per-session prompt-stream listeners, keyed by listener id.
type ListenerMap = Arc<Mutex<HashMap<String, HashMap<u64, mpsc::UnboundedSender<SessionUpdate>>>>>;

/// State recorded for one session established through a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Agent-assigned session identifier.
    pub session_id: String,
    /// Working directory the session is rooted at.
    pub cwd: String,
}

/// Completed prompt turn: the stop reason plus the text the agent
/// streamed while the turn ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptOutcome {
    /// Why the turn ended (`end_turn`, `cancelled`, …).
    pub stop_reason: String,
    /// Concatenated text of every agent message chunk in the turn.
    pub text: String,
}

/// A live agent subprocess plus its protocol client.
pub struct Connection {
    label: String,
    peer: RpcPeer,
    child: tokio::sync::Mutex<Option<Child>>,
    listeners: ListenerMap,
    next_listener_id: AtomicU64,
    init: Mutex<Option<InitializeResponse>>,
    sessions: Mutex<HashMap<String, SessionState>>,
    shutdown_grace: Duration,
}

impl Connection {
    /// Spawn the agent subprocess and wire the protocol client over its
    /// stdio. Callbacks from the agent are served by `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if the process cannot be spawned or its
    /// stdio pipes are unavailable.
    pub fn spawn(
        label: impl Into<String>,
        opts: &SpawnOptions,
        handler: Arc<dyn ClientCallbackHandler>,
    ) -> Result<Self> {
        let label = label.into();

        let mut command = Command::new(&opts.command);
        command
            .args(&opts.args)
            .envs(&opts.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &opts.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            AppError::Acp(format!("failed to spawn agent {}: {e}", opts.command))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Acp("agent stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Acp("agent stdout unavailable".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(label.clone(), stderr));
        }

        let listeners: ListenerMap = Arc::new(Mutex::new(HashMap::new()));
        let service = Arc::new(ConnectionService {
            label: label.clone(),
            handler,
            listeners: Arc::clone(&listeners),
        });
        let peer = RpcPeer::spawn(&label, stdout, stdin, service);

        info!(agent = %label, pid = ?child.id(), "agent subprocess spawned");

        Ok(Self {
            label,
            peer,
            child: tokio::sync::Mutex::new(Some(child)),
            listeners,
            next_listener_id: AtomicU64::new(1),
            init: Mutex::new(None),
            sessions: Mutex::new(HashMap::new()),
            shutdown_grace: opts.shutdown_grace,
        })
    }

    /// The label this connection logs under.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the protocol client is still usable.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.peer.is_open()
    }

    /// The cached handshake response, once [`Connection::initialize`] has
    /// succeeded.
    #[must_use]
    pub fn initialize_response(&self) -> Option<InitializeResponse> {
        self.init.lock().ok().and_then(|guard| guard.clone())
    }

    /// State recorded for `session_id`, if it was established through this
    /// connection.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<SessionState> {
        self.sessions
            .lock()
            .ok()
            .and_then(|guard| guard.get(session_id).cloned())
    }

    /// Ids of every session established through this connection.
    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions
            .lock()
            .map(|guard| guard.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn record_session(&self, session_id: &str, cwd: &str) {
        if let Ok(mut guard) = self.sessions.lock() {
            guard.insert(
                session_id.to_owned(),
                SessionState {
                    session_id: session_id.to_owned(),
                    cwd: cwd.to_owned(),
                },
            );
        }
    }

    // ── Outbound protocol calls ─────────────────────────────────────────────

    /// Run the handshake, declaring the full client capability set, and
    /// cache the agent's response for later replay.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] on transport failure or a malformed
    /// response.
    pub async fn initialize(&self) -> Result<InitializeResponse> {
        let request = InitializeRequest {
            protocol_version: PROTOCOL_VERSION,
            client_capabilities: ClientCapabilities::full(),
            client_info: Some(Implementation {
                name: env!("CARGO_PKG_NAME").to_owned(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_owned(),
            }),
        };
        let response: InitializeResponse = self.call(method::INITIALIZE, &request).await?;
        if let Ok(mut guard) = self.init.lock() {
            *guard = Some(response.clone());
        }
        Ok(response)
    }

    /// Authenticate with one of the agent's advertised methods.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] on transport failure or agent rejection.
    pub async fn authenticate(&self, method_id: impl Into<String>) -> Result<()> {
        let request = AuthenticateRequest {
            method_id: method_id.into(),
        };
        let _: Value = self.call(method::AUTHENTICATE, &request).await?;
        Ok(())
    }

    /// Create a new session rooted at `cwd`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] on transport failure or a malformed
    /// response.
    pub async fn new_session(&self, request: &NewSessionRequest) -> Result<NewSessionResponse> {
        let response: NewSessionResponse = self.call(method::SESSION_NEW, request).await?;
        self.record_session(&response.session_id, &request.cwd);
        Ok(response)
    }

    /// Restore a previously persisted session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] on transport failure or agent rejection.
    pub async fn load_session(&self, request: &LoadSessionRequest) -> Result<Value> {
        let response = self.call(method::SESSION_LOAD, request).await?;
        self.record_session(&request.session_id, &request.cwd);
        Ok(response)
    }

    /// Switch the session mode.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] on transport failure or agent rejection.
    pub async fn set_session_mode(&self, request: &SetSessionModeRequest) -> Result<Value> {
        self.call(method::SESSION_SET_MODE, request).await
    }

    /// Set a session config option.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] on transport failure or agent rejection.
    pub async fn set_session_config_option(
        &self,
        request: &SetSessionConfigOptionRequest,
    ) -> Result<Value> {
        self.call(method::SESSION_SET_CONFIG_OPTION, request).await
    }

    /// Send one prompt turn, await its completion, and collect the text
    /// the agent streamed during the turn.
    ///
    /// A turn-scoped listener accumulates text message chunks while the
    /// call is in flight; it is removed on every exit path. Session
    /// updates still go to the callback handler (and any active
    /// [`PromptStream`]) as usual.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] on transport failure or agent rejection.
    pub async fn prompt(&self, request: &PromptRequest) -> Result<PromptOutcome> {
        let (update_tx, mut update_rx) = mpsc::unbounded_channel();
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut guard = lock_listeners(&self.listeners)?;
            guard
                .entry(request.session_id.clone())
                .or_default()
                .insert(id, update_tx);
        }
        let _guard = ListenerGuard {
            listeners: Arc::clone(&self.listeners),
            session_id: request.session_id.clone(),
            id,
        };

        let response: PromptResponse = self.call(method::SESSION_PROMPT, request).await?;

        // Inbound lines are dispatched in wire order, so every update the
        // turn produced is already queued once the response resolves.
        let mut text = String::new();
        while let Ok(update) = update_rx.try_recv() {
            if let Some(chunk) = update.message_text() {
                text.push_str(chunk);
            }
        }

        Ok(PromptOutcome {
            stop_reason: response.stop_reason,
            text,
        })
    }

    /// Send one prompt turn and stream its session updates.
    ///
    /// The returned stream yields every update for the session until the
    /// turn completes; updates already queued when the turn ends are still
    /// delivered before the stream finishes.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if listener registration fails.
    pub fn stream_prompt(&self, request: PromptRequest) -> Result<PromptStream> {
        let session_id = request.session_id.clone();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut guard = lock_listeners(&self.listeners)?;
            guard
                .entry(session_id.clone())
                .or_default()
                .insert(id, update_tx);
        }
        let guard = ListenerGuard {
            listeners: Arc::clone(&self.listeners),
            session_id,
            id,
        };

        let (done_tx, done_rx) = oneshot::channel();
        let peer = self.peer.clone();
        tokio::spawn(async move {
            let outcome = match encode(method::SESSION_PROMPT, &request) {
                Ok(params) => match peer.request(method::SESSION_PROMPT, params).await {
                    Ok(value) => serde_json::from_value::<PromptResponse>(value).map_err(|e| {
                        AppError::Acp(format!("malformed session/prompt response: {e}"))
                    }),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            let _ = done_tx.send(outcome);
        });

        Ok(PromptStream {
            updates: update_rx,
            done: done_rx,
            outcome: None,
            _guard: guard,
        })
    }

    /// Ask the agent to stop the in-flight turn. Best-effort: a no-op on a
    /// closed connection, and the turn still completes through its prompt
    /// response (stop reason `cancelled`).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if the notification cannot be encoded or
    /// queued.
    pub async fn cancel(&self, session_id: impl Into<String>) -> Result<()> {
        if !self.peer.is_open() {
            return Ok(());
        }
        let params = encode(
            method::SESSION_CANCEL,
            &CancelNotification {
                session_id: session_id.into(),
            },
        )?;
        self.peer.notify(method::SESSION_CANCEL, params).await
    }

    // ── Shutdown ────────────────────────────────────────────────────────────

    /// Close the connection: end the agent's stdin, wait up to the grace
    /// window for a clean exit, then force-kill. Idempotent.
    pub async fn close(&self) {
        self.peer.close();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(agent = %self.label, ?status, "agent exited cleanly");
                }
                Ok(Err(e)) => {
                    warn!(agent = %self.label, error = %e, "wait for agent exit failed");
                }
                Err(_) => {
                    warn!(agent = %self.label, "agent did not exit within grace window, killing");
                    if let Err(e) = child.start_kill() {
                        warn!(agent = %self.label, error = %e, "failed to kill agent");
                    }
                    let _ = child.wait().await;
                }
            }
        }

        // Drop every stream listener so in-flight streams terminate.
        if let Ok(mut guard) = lock_listeners(&self.listeners) {
            guard.clear();
        }
        if let Ok(mut guard) = self.sessions.lock() {
            guard.clear();
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = encode(method, params)?;
        let result = self.peer.request(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| AppError::Acp(format!("malformed {method} response: {e}")))
    }
}

// ── Prompt streaming ─────────────────────────────────────────────────────────

/// Removes its listener registration when the stream is dropped.
struct ListenerGuard {
    listeners: ListenerMap,
    session_id: String,
    id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.listeners.lock() {
            if let Some(session) = guard.get_mut(&self.session_id) {
                session.remove(&self.id);
                if session.is_empty() {
                    guard.remove(&self.session_id);
                }
            }
        }
    }
}

/// Pull-based view of one prompt turn's session updates.
///
/// Yields updates in arrival order until the turn completes; then
/// [`PromptStream::finish`] returns the turn outcome. A prompt error is
/// surfaced only after every queued update has been delivered.
pub struct PromptStream {
    updates: mpsc::UnboundedReceiver<SessionUpdate>,
    done: oneshot::Receiver<Result<PromptResponse>>,
    outcome: Option<Result<PromptResponse>>,
    _guard: ListenerGuard,
}

impl PromptStream {
    /// The next session update, or `None` once the turn has completed and
    /// the queue is drained.
    pub async fn next(&mut self) -> Option<SessionUpdate> {
        loop {
            if self.outcome.is_some() {
                // Turn finished: deliver whatever is still queued.
                return self.updates.try_recv().ok();
            }

            tokio::select! {
                update = self.updates.recv() => {
                    match update {
                        Some(update) => return Some(update),
                        None => {
                            // Listener dropped (connection closed): the
                            // prompt task still reports the final outcome.
                            let outcome = (&mut self.done)
                                .await
                                .unwrap_or_else(|_| Err(stream_closed()));
                            self.outcome = Some(outcome);
                        }
                    }
                }
                done = &mut self.done => {
                    self.outcome = Some(done.unwrap_or_else(|_| Err(stream_closed())));
                }
            }
        }
    }

    /// Drain any remaining updates and return the turn outcome.
    ///
    /// # Errors
    ///
    /// Returns the prompt error if the turn failed, or
    /// [`AppError::Acp`]`("connection closed")` if the connection died
    /// before the turn completed.
    pub async fn finish(mut self) -> Result<PromptResponse> {
        while self.next().await.is_some() {}
        self.outcome.take().unwrap_or_else(|| Err(stream_closed()))
    }
}

fn stream_closed() -> AppError {
    AppError::Acp("connection closed".into())
}

// ── Inbound callback dispatch ────────────────────────────────────────────────

/// Serves agent → client traffic for one connection.
struct ConnectionService {
    label: String,
    handler: Arc<dyn ClientCallbackHandler>,
    listeners: ListenerMap,
}

impl ConnectionService {
    /// Send the update to every stream listening on its session, pruning
    /// listeners whose receiving side is gone.
    fn fan_out(&self, notification: &SessionNotification) {
        let Ok(mut guard) = self.listeners.lock() else {
            return;
        };
        if let Some(session) = guard.get_mut(&notification.session_id) {
            session.retain(|_, tx| tx.send(notification.update.clone()).is_ok());
            if session.is_empty() {
                guard.remove(&notification.session_id);
            }
        }
    }
}

impl RpcService for ConnectionService {
    fn handle_request(
        &self,
        method_name: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        let method_name = method_name.to_owned();
        Box::pin(async move {
            match method_name.as_str() {
                method::SESSION_REQUEST_PERMISSION => {
                    let request = parse(&method_name, params)?;
                    let response = self.handler.request_permission(request).await?;
                    encode(&method_name, &response)
                }
                method::FS_READ_TEXT_FILE => {
                    let request = parse(&method_name, params)?;
                    let response = self.handler.read_text_file(request).await?;
                    encode(&method_name, &response)
                }
                method::FS_WRITE_TEXT_FILE => {
                    let request = parse(&method_name, params)?;
                    let response = self.handler.write_text_file(request).await?;
                    encode(&method_name, &response)
                }
                method::TERMINAL_CREATE => {
                    let request = parse(&method_name, params)?;
                    let response = self.handler.create_terminal(request).await?;
                    encode(&method_name, &response)
                }
                method::TERMINAL_OUTPUT => {
                    let request = parse(&method_name, params)?;
                    let response = self.handler.terminal_output(request).await?;
                    encode(&method_name, &response)
                }
                method::TERMINAL_WAIT_FOR_EXIT => {
                    let request = parse(&method_name, params)?;
                    let response = self.handler.wait_for_terminal_exit(request).await?;
                    encode(&method_name, &response)
                }
                method::TERMINAL_KILL => {
                    let request = parse(&method_name, params)?;
                    let response = self.handler.kill_terminal(request).await?;
                    encode(&method_name, &response)
                }
                method::TERMINAL_RELEASE => {
                    let request = parse(&method_name, params)?;
                    let response = self.handler.release_terminal(request).await?;
                    encode(&method_name, &response)
                }
                other => Err(AppError::Unsupported(format!(
                    "method {other} not supported"
                ))),
            }
        })
    }

    fn handle_notification(
        &self,
        method_name: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let method_name = method_name.to_owned();
        Box::pin(async move {
            if method_name != method::SESSION_UPDATE {
                debug!(agent = %self.label, method = %method_name, "unhandled notification");
                return;
            }
            let notification: SessionNotification = match serde_json::from_value(params) {
                Ok(n) => n,
                Err(e) => {
                    warn!(agent = %self.label, error = %e, "malformed session/update, dropping");
                    return;
                }
            };

            self.fan_out(&notification);

            if let Err(e) = self.handler.session_update(notification).await {
                warn!(agent = %self.label, error = %e, "session update handler failed");
            }
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

async fn drain_stderr(label: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            debug!(agent = %label, line = %line, "agent stderr");
        }
    }
}

fn parse<T: DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| AppError::Acp(format!("malformed {method} params: {e}")))
}

fn encode<T: Serialize>(method: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| AppError::Acp(format!("failed to encode {method} payload: {e}")))
}

#[allow(clippy::type_complexity)]
fn lock_listeners(
    listeners: &ListenerMap,
) -> Result<std::sync::MutexGuard<'_, HashMap<String, HashMap<u64, mpsc::UnboundedSender<SessionUpdate>>>>>
{
    listeners
        .lock()
        .map_err(|_| AppError::Acp("listener map mutex poisoned".into()))
}
