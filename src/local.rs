//! Local fallback implementation of the client callbacks.
//!
//! This is the handler the router always has available: plain file I/O,
//! terminals backed by a [`TerminalManager`], and a permission slot that
//! either auto-approves the first allow-flavoured option or reports the
//! request cancelled. Policy logic lives in the router, not here.

use std::sync::Arc;

use tracing::warn;

use crate::acp::types::{
    CreateTerminalRequest, CreateTerminalResponse, KillTerminalRequest, KillTerminalResponse,
    PermissionOption, PermissionOptionKind, PermissionOutcome, ReadTextFileRequest,
    ReadTextFileResponse, ReleaseTerminalRequest, ReleaseTerminalResponse,
    RequestPermissionRequest, RequestPermissionResponse, SessionNotification, TerminalExitStatus,
    TerminalOutputRequest, TerminalOutputResponse, WaitForTerminalExitRequest,
    WriteTextFileRequest, WriteTextFileResponse,
};
use crate::handler::{ClientCallbackHandler, HandlerFuture};
use crate::terminal::TerminalManager;
use crate::AppError;

/// Callback invoked for every session update that reaches the local handler.
pub type SessionUpdateListener = Arc<dyn Fn(&SessionNotification) + Send + Sync>;

/// The always-available local destination for agent callbacks.
pub struct LocalCallbackHandler {
    auto_approve: bool,
    terminals: Arc<TerminalManager>,
    on_session_update: Option<SessionUpdateListener>,
}

impl LocalCallbackHandler {
    /// Build a local handler around a terminal manager.
    #[must_use]
    pub fn new(terminals: Arc<TerminalManager>, auto_approve: bool) -> Self {
        Self {
            auto_approve,
            terminals,
            on_session_update: None,
        }
    }

    /// Install a global session-update listener.
    #[must_use]
    pub fn with_session_update_listener(mut self, listener: SessionUpdateListener) -> Self {
        self.on_session_update = Some(listener);
        self
    }

    /// The terminal manager backing this handler.
    #[must_use]
    pub fn terminals(&self) -> &Arc<TerminalManager> {
        &self.terminals
    }
}

/// Pick the option auto-approve should select: the first allow-flavoured
/// option, falling back to the first offered.
#[must_use]
pub fn preferred_allow_option(options: &[PermissionOption]) -> Option<&PermissionOption> {
    options
        .iter()
        .find(|o| {
            matches!(
                o.kind,
                PermissionOptionKind::AllowOnce | PermissionOptionKind::AllowAlways
            )
        })
        .or_else(|| options.first())
}

impl ClientCallbackHandler for LocalCallbackHandler {
    fn request_permission(
        &self,
        params: RequestPermissionRequest,
    ) -> HandlerFuture<'_, RequestPermissionResponse> {
        let auto_approve = self.auto_approve;
        Box::pin(async move {
            if auto_approve {
                if let Some(option) = preferred_allow_option(&params.options) {
                    return Ok(RequestPermissionResponse {
                        outcome: PermissionOutcome::Selected {
                            option_id: option.option_id.clone(),
                        },
                    });
                }
            }
            warn!(
                session_id = %params.session_id,
                "permission request cancelled (no interactive handler)"
            );
            Ok(RequestPermissionResponse {
                outcome: PermissionOutcome::Cancelled,
            })
        })
    }

    fn session_update(&self, params: SessionNotification) -> HandlerFuture<'_, ()> {
        if let Some(listener) = &self.on_session_update {
            listener(&params);
        }
        Box::pin(async { Ok(()) })
    }

    fn read_text_file(
        &self,
        params: ReadTextFileRequest,
    ) -> HandlerFuture<'_, ReadTextFileResponse> {
        Box::pin(async move {
            let raw = tokio::fs::read_to_string(&params.path)
                .await
                .map_err(|e| AppError::Io(format!("cannot read file {}: {e}", params.path)))?;

            let content = if params.line.is_some() || params.limit.is_some() {
                window_lines(&raw, params.line, params.limit)
            } else {
                raw
            };
            Ok(ReadTextFileResponse { content })
        })
    }

    fn write_text_file(
        &self,
        params: WriteTextFileRequest,
    ) -> HandlerFuture<'_, WriteTextFileResponse> {
        Box::pin(async move {
            if let Some(parent) = std::path::Path::new(&params.path).parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::Io(format!("cannot create parent of {}: {e}", params.path))
                })?;
            }
            tokio::fs::write(&params.path, &params.content)
                .await
                .map_err(|e| AppError::Io(format!("cannot write file {}: {e}", params.path)))?;
            Ok(WriteTextFileResponse {})
        })
    }

    fn create_terminal(
        &self,
        params: CreateTerminalRequest,
    ) -> HandlerFuture<'_, CreateTerminalResponse> {
        let result = self.terminals.create(&params);
        Box::pin(async move { result })
    }

    fn terminal_output(
        &self,
        params: TerminalOutputRequest,
    ) -> HandlerFuture<'_, TerminalOutputResponse> {
        let result = self.terminals.output(&params.terminal_id);
        Box::pin(async move { result })
    }

    fn wait_for_terminal_exit(
        &self,
        params: WaitForTerminalExitRequest,
    ) -> HandlerFuture<'_, TerminalExitStatus> {
        let terminals = Arc::clone(&self.terminals);
        Box::pin(async move { terminals.wait_for_exit(&params.terminal_id).await })
    }

    fn kill_terminal(&self, params: KillTerminalRequest) -> HandlerFuture<'_, KillTerminalResponse> {
        let result = self.terminals.kill(&params.terminal_id);
        Box::pin(async move { result.map(|()| KillTerminalResponse {}) })
    }

    fn release_terminal(
        &self,
        params: ReleaseTerminalRequest,
    ) -> HandlerFuture<'_, ReleaseTerminalResponse> {
        let result = self.terminals.release(&params.terminal_id);
        Box::pin(async move { result.map(|()| ReleaseTerminalResponse {}) })
    }
}

/// Slice `raw` to the requested 1-based line window.
fn window_lines(raw: &str, line: Option<u32>, limit: Option<u32>) -> String {
    let lines: Vec<&str> = raw.split('\n').collect();
    let start = line.map_or(0, |l| (l.max(1) - 1) as usize).min(lines.len());
    let end = limit.map_or(lines.len(), |l| start.saturating_add(l as usize));
    lines[start..end.min(lines.len())].join("\n")
}
