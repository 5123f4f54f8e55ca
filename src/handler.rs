//! Pluggable handler for every client callback an agent can invoke.
//!
//! Two implementations exist: [`crate::local::LocalCallbackHandler`] (the
//! always-available fallback) and the gateway's peer adapter. The
//! [`crate::router::CallbackRouter`] selects between them per call, so
//! routing is a choice of trait-object value rather than a branch on type.
//!
//! The terminal methods have default bodies that fail with
//! [`AppError::Unsupported`]: a handler that does not override them simply
//! does not offer terminal support, and callers see the canonical
//! `"Terminal not supported"` error.

use std::future::Future;
use std::pin::Pin;

use crate::acp::types::{
    CreateTerminalRequest, CreateTerminalResponse, KillTerminalRequest, KillTerminalResponse,
    ReadTextFileRequest, ReadTextFileResponse, ReleaseTerminalRequest, ReleaseTerminalResponse,
    RequestPermissionRequest, RequestPermissionResponse, SessionNotification,
    TerminalExitStatus, TerminalOutputRequest, TerminalOutputResponse, WaitForTerminalExitRequest,
    WriteTextFileRequest, WriteTextFileResponse,
};
use crate::{AppError, Result};

/// Boxed future returned by handler methods.
pub type HandlerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

fn terminal_unsupported<T>() -> HandlerFuture<'static, T> {
    Box::pin(async { Err(AppError::Unsupported("Terminal not supported".into())) })
}

/// One destination capable of serving agent → client callbacks.
pub trait ClientCallbackHandler: Send + Sync {
    /// Resolve a tool permission request.
    fn request_permission(
        &self,
        params: RequestPermissionRequest,
    ) -> HandlerFuture<'_, RequestPermissionResponse>;

    /// Consume a session progress notification (no response on the wire).
    fn session_update(&self, params: SessionNotification) -> HandlerFuture<'_, ()>;

    /// Read a text file, optionally windowed by line/limit.
    fn read_text_file(&self, params: ReadTextFileRequest)
        -> HandlerFuture<'_, ReadTextFileResponse>;

    /// Write a text file, creating parent directories as needed.
    fn write_text_file(
        &self,
        params: WriteTextFileRequest,
    ) -> HandlerFuture<'_, WriteTextFileResponse>;

    /// Spawn a terminal process.
    fn create_terminal(
        &self,
        _params: CreateTerminalRequest,
    ) -> HandlerFuture<'_, CreateTerminalResponse> {
        terminal_unsupported()
    }

    /// Fetch buffered terminal output.
    fn terminal_output(
        &self,
        _params: TerminalOutputRequest,
    ) -> HandlerFuture<'_, TerminalOutputResponse> {
        terminal_unsupported()
    }

    /// Await terminal exit.
    fn wait_for_terminal_exit(
        &self,
        _params: WaitForTerminalExitRequest,
    ) -> HandlerFuture<'_, TerminalExitStatus> {
        terminal_unsupported()
    }

    /// Terminate a terminal process.
    fn kill_terminal(&self, _params: KillTerminalRequest) -> HandlerFuture<'_, KillTerminalResponse> {
        terminal_unsupported()
    }

    /// Release a terminal id.
    fn release_terminal(
        &self,
        _params: ReleaseTerminalRequest,
    ) -> HandlerFuture<'_, ReleaseTerminalResponse> {
        terminal_unsupported()
    }
}
