//! Bridges an attached peer client to the downstream agent connection.
//!
//! The gateway speaks the agent role toward the peer: it serves the
//! peer's `initialize` by replaying the downstream agent's cached
//! handshake, forwards session traffic (new/load/prompt/cancel/mode/
//! config) to the downstream [`Connection`], and attaches the peer to the
//! [`CallbackRouter`] so agent callbacks flow outward for the
//! capabilities the peer declared.
//!
//! Only one peer may be attached at a time; accepting while a live peer
//! exists fails with [`AppError::Conflict`]. When the peer transport
//! closes, the router detaches and everything reverts to local handling.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::acp::rpc::{RpcPeer, RpcService};
use crate::acp::types::{
    method, AuthenticateRequest, CancelNotification, CreateTerminalRequest,
    CreateTerminalResponse, InitializeRequest, InitializeResponse, KillTerminalRequest,
    KillTerminalResponse, LoadSessionRequest, NewSessionRequest, PromptRequest, PromptResponse,
    ReadTextFileRequest, ReadTextFileResponse, ReleaseTerminalRequest, ReleaseTerminalResponse,
    RequestPermissionRequest, RequestPermissionResponse, SessionNotification,
    SetSessionConfigOptionRequest, SetSessionModeRequest, TerminalExitStatus,
    TerminalOutputRequest, TerminalOutputResponse, WaitForTerminalExitRequest,
    WriteTextFileRequest, WriteTextFileResponse, PROTOCOL_VERSION,
};
use crate::connection::Connection;
use crate::handler::{ClientCallbackHandler, HandlerFuture};
use crate::router::CallbackRouter;
use crate::{AppError, Result};

/// Bridge between one peer client and the downstream agent.
pub struct Gateway {
    label: String,
    downstream: Arc<Connection>,
    router: Arc<CallbackRouter>,
    upstream: Mutex<Option<RpcPeer>>,
}

impl Gateway {
    /// Build a gateway over an established downstream connection.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        downstream: Arc<Connection>,
        router: Arc<CallbackRouter>,
    ) -> Self {
        Self {
            label: label.into(),
            downstream,
            router,
            upstream: Mutex::new(None),
        }
    }

    /// Whether a peer is currently connected.
    #[must_use]
    pub fn is_upstream_connected(&self) -> bool {
        self.upstream
            .lock()
            .ok()
            .is_some_and(|guard| guard.as_ref().is_some_and(RpcPeer::is_open))
    }

    /// Accept a peer transport and start serving it.
    ///
    /// The peer is not attached to the router until its `initialize`
    /// arrives, because attachment needs the capabilities it declares.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Conflict`] if a live peer is already connected.
    pub fn accept<S>(&self, transport: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut guard = self
            .upstream
            .lock()
            .map_err(|_| AppError::Acp("gateway upstream mutex poisoned".into()))?;
        if guard.as_ref().is_some_and(RpcPeer::is_open) {
            return Err(AppError::Conflict(
                "gateway already has an active peer connection".into(),
            ));
        }

        let peer_slot: Arc<OnceLock<RpcPeer>> = Arc::new(OnceLock::new());
        let service = Arc::new(PeerService {
            label: self.label.clone(),
            downstream: Arc::clone(&self.downstream),
            router: Arc::clone(&self.router),
            peer_slot: Arc::clone(&peer_slot),
        });

        let (reader, writer) = tokio::io::split(transport);
        let peer = RpcPeer::spawn(&format!("{}-peer", self.label), reader, writer, service);
        let _ = peer_slot.set(peer.clone());

        // Detach the router as soon as the peer transport dies.
        {
            let peer = peer.clone();
            let router = Arc::clone(&self.router);
            let label = self.label.clone();
            tokio::spawn(async move {
                peer.closed().await;
                info!(gateway = %label, "peer disconnected");
                router.detach_upstream();
            });
        }

        info!(gateway = %self.label, "peer connected");
        *guard = Some(peer);
        Ok(())
    }

    /// Disconnect the current peer, if any, and revert to local handling.
    pub fn disconnect_upstream(&self) {
        let peer = self.upstream.lock().ok().and_then(|mut guard| guard.take());
        if let Some(peer) = peer {
            peer.close();
        }
        self.router.detach_upstream();
    }
}

// ── Peer-facing service ──────────────────────────────────────────────────────

/// Serves requests arriving from the peer (the gateway's agent role).
struct PeerService {
    label: String,
    downstream: Arc<Connection>,
    router: Arc<CallbackRouter>,
    peer_slot: Arc<OnceLock<RpcPeer>>,
}

impl PeerService {
    /// Handle the peer's `initialize`: attach it to the router with the
    /// capabilities it declared, then replay the downstream agent's cached
    /// handshake so the peer sees the real agent's capabilities.
    fn serve_initialize(&self, request: &InitializeRequest) -> Result<InitializeResponse> {
        let peer = self
            .peer_slot
            .get()
            .cloned()
            .ok_or_else(|| AppError::Acp("gateway peer not ready".into()))?;
        self.router.attach_upstream(
            Arc::new(UpstreamPeer { peer }),
            request.client_capabilities,
        );

        if let Some(cached) = self.downstream.initialize_response() {
            return Ok(cached);
        }
        // Downstream handshake not cached: answer with a bare identity so
        // the peer can still proceed.
        warn!(gateway = %self.label, "no cached downstream handshake, replying with defaults");
        Ok(InitializeResponse {
            protocol_version: PROTOCOL_VERSION,
            agent_capabilities: crate::acp::types::AgentCapabilities::default(),
            agent_info: Some(crate::acp::types::Implementation {
                name: env!("CARGO_PKG_NAME").to_owned(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_owned(),
            }),
            auth_methods: None,
        })
    }
}

impl RpcService for PeerService {
    fn handle_request(
        &self,
        method_name: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        let method_name = method_name.to_owned();
        Box::pin(async move {
            match method_name.as_str() {
                method::INITIALIZE => {
                    let request: InitializeRequest = parse(&method_name, params)?;
                    let response = self.serve_initialize(&request)?;
                    encode(&method_name, &response)
                }
                method::AUTHENTICATE => {
                    let request: AuthenticateRequest = parse(&method_name, params)?;
                    self.downstream.authenticate(request.method_id).await?;
                    Ok(json!({}))
                }
                method::SESSION_NEW => {
                    let request: NewSessionRequest = parse(&method_name, params)?;
                    let response = self.downstream.new_session(&request).await?;
                    encode(&method_name, &response)
                }
                method::SESSION_LOAD => {
                    let request: LoadSessionRequest = parse(&method_name, params)?;
                    self.downstream.load_session(&request).await
                }
                method::SESSION_PROMPT => {
                    let request: PromptRequest = parse(&method_name, params)?;
                    let outcome = self.downstream.prompt(&request).await?;
                    // The peer sees the turn's text through forwarded
                    // session/update notifications; the response carries
                    // the stop reason only.
                    encode(
                        &method_name,
                        &PromptResponse {
                            stop_reason: outcome.stop_reason,
                        },
                    )
                }
                method::SESSION_SET_MODE => {
                    let request: SetSessionModeRequest = parse(&method_name, params)?;
                    self.downstream.set_session_mode(&request).await
                }
                method::SESSION_SET_CONFIG_OPTION => {
                    let request: SetSessionConfigOptionRequest = parse(&method_name, params)?;
                    self.downstream.set_session_config_option(&request).await
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
            if method_name != method::SESSION_CANCEL {
                debug!(gateway = %self.label, method = %method_name, "unhandled peer notification");
                return;
            }
            let notification: CancelNotification = match serde_json::from_value(params) {
                Ok(n) => n,
                Err(e) => {
                    warn!(gateway = %self.label, error = %e, "malformed session/cancel, dropping");
                    return;
                }
            };
            if let Err(e) = self.downstream.cancel(notification.session_id).await {
                warn!(gateway = %self.label, error = %e, "cancel forward failed");
            }
        })
    }
}

// ── Upstream adapter ─────────────────────────────────────────────────────────

/// The attached peer seen through the [`ClientCallbackHandler`] trait.
///
/// Every callback family the peer can declare — permissions, session
/// updates, file I/O, and terminals — forwards over its RPC transport.
/// Terminal ids pass through unchanged; the peer owns the processes
/// behind them.
struct UpstreamPeer {
    peer: RpcPeer,
}

impl UpstreamPeer {
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

impl ClientCallbackHandler for UpstreamPeer {
    fn request_permission(
        &self,
        params: RequestPermissionRequest,
    ) -> HandlerFuture<'_, RequestPermissionResponse> {
        Box::pin(async move { self.call(method::SESSION_REQUEST_PERMISSION, &params).await })
    }

    fn session_update(&self, params: SessionNotification) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            let params = encode(method::SESSION_UPDATE, &params)?;
            self.peer.notify(method::SESSION_UPDATE, params).await
        })
    }

    fn read_text_file(
        &self,
        params: ReadTextFileRequest,
    ) -> HandlerFuture<'_, ReadTextFileResponse> {
        Box::pin(async move { self.call(method::FS_READ_TEXT_FILE, &params).await })
    }

    fn write_text_file(
        &self,
        params: WriteTextFileRequest,
    ) -> HandlerFuture<'_, WriteTextFileResponse> {
        Box::pin(async move { self.call(method::FS_WRITE_TEXT_FILE, &params).await })
    }

    fn create_terminal(
        &self,
        params: CreateTerminalRequest,
    ) -> HandlerFuture<'_, CreateTerminalResponse> {
        Box::pin(async move { self.call(method::TERMINAL_CREATE, &params).await })
    }

    fn terminal_output(
        &self,
        params: TerminalOutputRequest,
    ) -> HandlerFuture<'_, TerminalOutputResponse> {
        Box::pin(async move { self.call(method::TERMINAL_OUTPUT, &params).await })
    }

    fn wait_for_terminal_exit(
        &self,
        params: WaitForTerminalExitRequest,
    ) -> HandlerFuture<'_, TerminalExitStatus> {
        Box::pin(async move { self.call(method::TERMINAL_WAIT_FOR_EXIT, &params).await })
    }

    fn kill_terminal(&self, params: KillTerminalRequest) -> HandlerFuture<'_, KillTerminalResponse> {
        Box::pin(async move { self.call(method::TERMINAL_KILL, &params).await })
    }

    fn release_terminal(
        &self,
        params: ReleaseTerminalRequest,
    ) -> HandlerFuture<'_, ReleaseTerminalResponse> {
        Box::pin(async move { self.call(method::TERMINAL_RELEASE, &params).await })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn parse<T: DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| AppError::Acp(format!("malformed {method} params: {e}")))
}

fn encode<T: Serialize>(method: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| AppError::Acp(format!("failed to encode {method} payload: {e}")))
}
