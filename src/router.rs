//! Routes agent callbacks between an attached peer and local handlers.
//!
//! The agent always sees the full client capability set; when a peer is
//! attached, each callback is forwarded to it only if the peer declared
//! the matching capability, and falls back to the local handler when the
//! peer lacks it or the forward fails. Detaching reverts everything to
//! local. The agent never observes the switch.
//!
//! Permission requests pass through an optional [`PolicyEnforcer`] first:
//! an allow or deny decision resolves the request immediately, without
//! touching the peer; only `ask` keeps routing.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::acp::types::{
    ClientCapabilities, CreateTerminalRequest, CreateTerminalResponse, KillTerminalRequest,
    KillTerminalResponse, ReadTextFileRequest, ReadTextFileResponse, ReleaseTerminalRequest,
    ReleaseTerminalResponse, RequestPermissionRequest, RequestPermissionResponse,
    SessionNotification, TerminalExitStatus, TerminalOutputRequest, TerminalOutputResponse,
    WaitForTerminalExitRequest, WriteTextFileRequest, WriteTextFileResponse,
};
use crate::audit::ToolCallObserver;
use crate::handler::{ClientCallbackHandler, HandlerFuture};
use crate::policy::{PolicyAction, PolicyEnforcer, ToolCallInfo};

/// An attached peer: its handler and the capabilities it declared.
///
/// Held as one value so a half-attached state cannot exist.
struct Upstream {
    handler: Arc<dyn ClientCallbackHandler>,
    capabilities: ClientCapabilities,
}

/// Callback router: peer-first with capability gating, local fallback.
pub struct CallbackRouter {
    local: Arc<dyn ClientCallbackHandler>,
    upstream: Mutex<Option<Upstream>>,
    enforcer: Mutex<Option<PolicyEnforcer>>,
    observer: Mutex<Option<Arc<ToolCallObserver>>>,
}

impl CallbackRouter {
    /// Build a router over the always-available local handler.
    #[must_use]
    pub fn new(local: Arc<dyn ClientCallbackHandler>) -> Self {
        Self {
            local,
            upstream: Mutex::new(None),
            enforcer: Mutex::new(None),
            observer: Mutex::new(None),
        }
    }

    /// Install or clear the permission policy pre-filter.
    pub fn set_enforcer(&self, enforcer: Option<PolicyEnforcer>) {
        if let Ok(mut guard) = self.enforcer.lock() {
            *guard = enforcer;
        }
    }

    /// Install or clear the tool-call observer.
    pub fn set_observer(&self, observer: Option<Arc<ToolCallObserver>>) {
        if let Ok(mut guard) = self.observer.lock() {
            *guard = observer;
        }
    }

    /// Activate forwarding: callbacks route to `handler` for the
    /// capabilities it declared.
    pub fn attach_upstream(
        &self,
        handler: Arc<dyn ClientCallbackHandler>,
        capabilities: ClientCapabilities,
    ) {
        info!(
            terminal = capabilities.terminal,
            fs_read = capabilities.fs.read_text_file,
            fs_write = capabilities.fs.write_text_file,
            "upstream peer attached, forwarding active"
        );
        if let Ok(mut guard) = self.upstream.lock() {
            *guard = Some(Upstream {
                handler,
                capabilities,
            });
        }
    }

    /// Deactivate forwarding; every callback reverts to local handling.
    pub fn detach_upstream(&self) {
        if let Ok(mut guard) = self.upstream.lock() {
            if guard.take().is_some() {
                info!("upstream peer detached, local mode");
            }
        }
    }

    /// Whether a peer is currently attached.
    #[must_use]
    pub fn is_lease_active(&self) -> bool {
        self.upstream
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    // ── Lock helpers ────────────────────────────────────────────────────────
    //
    // Each returns a clone so no guard is held across an await point.

    fn enforcer(&self) -> Option<PolicyEnforcer> {
        self.enforcer.lock().ok().and_then(|guard| guard.clone())
    }

    fn observer(&self) -> Option<Arc<ToolCallObserver>> {
        self.observer.lock().ok().and_then(|guard| guard.clone())
    }

    /// The attached handler, regardless of capabilities.
    fn upstream_handler(&self) -> Option<Arc<dyn ClientCallbackHandler>> {
        self.upstream
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|u| Arc::clone(&u.handler)))
    }

    /// The attached handler, only if its capabilities pass `gate`.
    fn upstream_if(
        &self,
        gate: impl Fn(&ClientCapabilities) -> bool,
    ) -> Option<Arc<dyn ClientCallbackHandler>> {
        self.upstream.lock().ok().and_then(|guard| {
            guard
                .as_ref()
                .filter(|u| gate(&u.capabilities))
                .map(|u| Arc::clone(&u.handler))
        })
    }
}

impl ClientCallbackHandler for CallbackRouter {
    fn request_permission(
        &self,
        params: RequestPermissionRequest,
    ) -> HandlerFuture<'_, RequestPermissionResponse> {
        Box::pin(async move {
            // Policy pre-filter: allow/deny resolve without any forwarding.
            if !params.options.is_empty() {
                if let Some(enforcer) = self.enforcer() {
                    let info = params.tool_call.as_ref().map_or_else(
                        || ToolCallInfo {
                            tool_call_id: "unknown".into(),
                            ..ToolCallInfo::default()
                        },
                        ToolCallInfo::from_update,
                    );
                    let decision = enforcer.evaluate(&info);
                    match decision.action {
                        PolicyAction::Allow | PolicyAction::Deny => {
                            debug!(
                                session_id = %params.session_id,
                                action = ?decision.action,
                                matched_rule = ?decision.matched_rule,
                                "permission resolved by policy"
                            );
                            let outcome =
                                PolicyEnforcer::build_outcome(&decision, &params.options);
                            return Ok(RequestPermissionResponse { outcome });
                        }
                        PolicyAction::Ask => {}
                    }
                }
            }

            if let Some(upstream) = self.upstream_handler() {
                match upstream.request_permission(params.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        warn!(error = %e, "permission forward to peer failed, falling back");
                    }
                }
            }
            self.local.request_permission(params).await
        })
    }

    fn session_update(&self, params: SessionNotification) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            if let Some(observer) = self.observer() {
                observer.observe(&params);
            }

            // Local listeners always see the update.
            self.local.session_update(params.clone()).await?;

            // Peer delivery is best-effort; it may have disconnected.
            if let Some(upstream) = self.upstream_handler() {
                if let Err(e) = upstream.session_update(params).await {
                    debug!(error = %e, "session update forward to peer failed");
                }
            }
            Ok(())
        })
    }

    fn read_text_file(
        &self,
        params: ReadTextFileRequest,
    ) -> HandlerFuture<'_, ReadTextFileResponse> {
        Box::pin(async move {
            if let Some(upstream) = self.upstream_if(|caps| caps.fs.read_text_file) {
                match upstream.read_text_file(params.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        warn!(path = %params.path, error = %e, "peer read failed, falling back");
                    }
                }
            }
            self.local.read_text_file(params).await
        })
    }

    fn write_text_file(
        &self,
        params: WriteTextFileRequest,
    ) -> HandlerFuture<'_, WriteTextFileResponse> {
        Box::pin(async move {
            if let Some(upstream) = self.upstream_if(|caps| caps.fs.write_text_file) {
                match upstream.write_text_file(params.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        warn!(path = %params.path, error = %e, "peer write failed, falling back");
                    }
                }
            }
            self.local.write_text_file(params).await
        })
    }

    fn create_terminal(
        &self,
        params: CreateTerminalRequest,
    ) -> HandlerFuture<'_, CreateTerminalResponse> {
        Box::pin(async move {
            if let Some(upstream) = self.upstream_if(|caps| caps.terminal) {
                match upstream.create_terminal(params.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        warn!(error = %e, "peer create_terminal failed, falling back");
                    }
                }
            }
            self.local.create_terminal(params).await
        })
    }

    fn terminal_output(
        &self,
        params: TerminalOutputRequest,
    ) -> HandlerFuture<'_, TerminalOutputResponse> {
        Box::pin(async move {
            if let Some(upstream) = self.upstream_if(|caps| caps.terminal) {
                match upstream.terminal_output(params.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        warn!(error = %e, "peer terminal_output failed, falling back");
                    }
                }
            }
            self.local.terminal_output(params).await
        })
    }

    fn wait_for_terminal_exit(
        &self,
        params: WaitForTerminalExitRequest,
    ) -> HandlerFuture<'_, TerminalExitStatus> {
        Box::pin(async move {
            if let Some(upstream) = self.upstream_if(|caps| caps.terminal) {
                match upstream.wait_for_terminal_exit(params.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        warn!(error = %e, "peer wait_for_terminal_exit failed, falling back");
                    }
                }
            }
            self.local.wait_for_terminal_exit(params).await
        })
    }

    fn kill_terminal(
        &self,
        params: KillTerminalRequest,
    ) -> HandlerFuture<'_, KillTerminalResponse> {
        Box::pin(async move {
            if let Some(upstream) = self.upstream_if(|caps| caps.terminal) {
                match upstream.kill_terminal(params.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        warn!(error = %e, "peer kill_terminal failed, falling back");
                    }
                }
            }
            self.local.kill_terminal(params).await
        })
    }

    fn release_terminal(
        &self,
        params: ReleaseTerminalRequest,
    ) -> HandlerFuture<'_, ReleaseTerminalResponse> {
        Box::pin(async move {
            if let Some(upstream) = self.upstream_if(|caps| caps.terminal) {
                match upstream.release_terminal(params.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        warn!(error = %e, "peer release_terminal failed, falling back");
                    }
                }
            }
            self.local.release_terminal(params).await
        })
    }
}
