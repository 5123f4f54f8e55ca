//! Symmetric JSON-RPC peer over a line-framed duplex stream.
//!
//! One `RpcPeer` drives both directions of a connection: outbound requests
//! are correlated to responses through a pending map keyed by integer id,
//! and inbound requests/notifications are dispatched to an [`RpcService`].
//! The same machinery serves the client role (bridge ↔ agent stdio) and the
//! agent role (gateway ↔ peer transport); only the service differs.
//!
//! # Task layout
//!
//! - **writer task** — drains an [`mpsc`] channel of serialized lines into a
//!   [`FramedWrite`] over the stream's write half.
//! - **reader task** — decodes lines from a [`FramedRead`], resolves
//!   responses against the pending map, and spawns one task per inbound
//!   request so a slow callback (e.g. a terminal wait) never blocks the read
//!   loop. Notifications are handled inline, so a `session/update` is always
//!   delivered before the response that follows it on the wire.
//!
//! EOF or an unrecoverable stream error cancels the shared token, fails
//! every pending request with `AppError::Acp("connection closed")`, and
//! marks the peer closed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::WireCodec;
use crate::{AppError, Result};

/// Handler for inbound traffic on one side of an RPC connection.
///
/// Implementations map wire method names onto domain calls. Requests must
/// produce a result value or an error; notifications are fire-and-forget.
pub trait RpcService: Send + Sync + 'static {
    /// Serve one inbound request.
    fn handle_request(
        &self,
        method: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>>;

    /// Consume one inbound notification.
    fn handle_notification(
        &self,
        method: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Map of in-flight outbound requests awaiting a response.
///
/// `None` means the connection is closed and no further request may be
/// registered.
type PendingMap = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<Result<Value>>>>>>;

/// One side of a JSON-RPC connection. Cheap to clone.
#[derive(Clone)]
pub struct RpcPeer {
    outbound: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RpcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPeer")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl RpcPeer {
    /// Spawn the reader and writer tasks over a split stream and return the
    /// handle used to issue outbound calls.
    ///
    /// `label` tags log lines so concurrent peers are distinguishable.
    pub fn spawn<R, W>(label: &str, reader: R, writer: W, service: Arc<dyn RpcService>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(64);
        let pending: PendingMap = Arc::new(Mutex::new(Some(HashMap::new())));
        let cancel = CancellationToken::new();

        let peer = Self {
            outbound: outbound_tx,
            pending: Arc::clone(&pending),
            next_id: Arc::new(AtomicU64::new(1)),
            cancel: cancel.clone(),
        };

        tokio::spawn(run_writer(
            label.to_owned(),
            writer,
            outbound_rx,
            cancel.clone(),
        ));
        tokio::spawn(run_reader(
            label.to_owned(),
            reader,
            service,
            peer.clone(),
            pending,
            cancel,
        ));

        peer
    }

    /// Whether the connection is still usable.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Resolves when the connection closes, from either side.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Close the connection: stop both tasks and fail all pending requests.
    pub fn close(&self) {
        self.cancel.cancel();
        fail_pending(&self.pending);
    }

    /// Issue a request and await the correlated response.
    ///
    /// # Errors
    ///
    /// - [`AppError::Acp`]`("connection closed")` — the stream ended before
    ///   a response arrived, or was already closed.
    /// - [`AppError::Acp`]`("remote error …")` — the remote answered with a
    ///   JSON-RPC error object.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut guard = lock_pending(&self.pending)?;
            let Some(map) = guard.as_mut() else {
                return Err(closed_error());
            };
            map.insert(id, tx);
        }

        let line = serialize(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))?;

        if self.outbound.send(line).await.is_err() {
            // Writer gone — deregister and fail.
            if let Ok(mut guard) = lock_pending(&self.pending) {
                if let Some(map) = guard.as_mut() {
                    map.remove(&id);
                }
            }
            return Err(closed_error());
        }

        rx.await.unwrap_or_else(|_| Err(closed_error()))
    }

    /// Send a one-way notification.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`]`("connection closed")` if the writer task
    /// has stopped.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let line = serialize(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))?;
        self.outbound.send(line).await.map_err(|_| closed_error())
    }

    /// Send a success response for an inbound request.
    async fn respond_ok(&self, id: u64, result: Value) {
        let msg = json!({ "jsonrpc": "2.0", "id": id, "result": result });
        if let Ok(line) = serialize(&msg) {
            let _ = self.outbound.send(line).await;
        }
    }

    /// Send an error response for an inbound request.
    async fn respond_err(&self, id: u64, err: &AppError) {
        let code = match err {
            AppError::Unsupported(_) => -32601,
            AppError::NotFound(_) => -32002,
            _ => -32603,
        };
        let msg = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": err.to_string() },
        });
        if let Ok(line) = serialize(&msg) {
            let _ = self.outbound.send(line).await;
        }
    }
}

// ── Writer task ──────────────────────────────────────────────────────────────

async fn run_writer<W>(
    label: String,
    writer: W,
    mut outbound_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut framed = FramedWrite::new(writer, WireCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(peer = %label, "rpc writer: cancellation received, stopping");
                break;
            }

            line = outbound_rx.recv() => {
                match line {
                    None => {
                        debug!(peer = %label, "rpc writer: channel closed, stopping");
                        break;
                    }
                    Some(line) => {
                        if let Err(e) = framed.send(line).await {
                            warn!(peer = %label, error = %e, "rpc writer: write failed, closing");
                            cancel.cancel();
                            break;
                        }
                    }
                }
            }
        }
    }
}

// ── Reader task ──────────────────────────────────────────────────────────────

async fn run_reader<R>(
    label: String,
    reader: R,
    service: Arc<dyn RpcService>,
    peer: RpcPeer,
    pending: PendingMap,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut framed = FramedRead::new(reader, WireCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(peer = %label, "rpc reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(peer = %label, "rpc reader: EOF");
                        break;
                    }
                    Some(Err(AppError::Acp(msg))) => {
                        // Framing error (line too long) — skip the line.
                        warn!(peer = %label, error = %msg, "rpc reader: framing error, skipping");
                    }
                    Some(Err(e)) => {
                        warn!(peer = %label, error = %e, "rpc reader: stream error, closing");
                        break;
                    }
                    Some(Ok(line)) => {
                        dispatch_line(&label, &line, &service, &peer, &pending).await;
                    }
                }
            }
        }
    }

    cancel.cancel();
    fail_pending(&pending);
}

/// Classify one decoded line and route it.
async fn dispatch_line(
    label: &str,
    line: &str,
    service: &Arc<dyn RpcService>,
    peer: &RpcPeer,
    pending: &PendingMap,
) {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!(peer = %label, error = %e, "rpc reader: malformed json, skipping line");
            return;
        }
    };

    let method = value.get("method").and_then(Value::as_str);
    let id = value.get("id").and_then(Value::as_u64);

    match (method, id) {
        // Inbound request: serve on its own task.
        (Some(method), Some(id)) => {
            let method = method.to_owned();
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            let service = Arc::clone(service);
            let peer = peer.clone();
            tokio::spawn(async move {
                match service.handle_request(&method, params).await {
                    Ok(result) => peer.respond_ok(id, result).await,
                    Err(err) => peer.respond_err(id, &err).await,
                }
            });
        }

        // Inbound notification: handled inline so later lines (e.g. the
        // prompt response) cannot overtake it.
        (Some(method), None) => {
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            service.handle_notification(method, params).await;
        }

        // Response to one of our requests.
        (None, Some(id)) => {
            let outcome = if let Some(err) = value.get("error") {
                let code = err.get("code").and_then(Value::as_i64).unwrap_or(-32603);
                let message = err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                Err(AppError::Acp(format!("remote error {code}: {message}")))
            } else {
                Ok(value.get("result").cloned().unwrap_or(Value::Null))
            };

            let tx = lock_pending(pending)
                .ok()
                .and_then(|mut guard| guard.as_mut().and_then(|map| map.remove(&id)));
            match tx {
                Some(tx) => {
                    let _ = tx.send(outcome);
                }
                None => {
                    debug!(peer = %label, id, "rpc reader: response for unknown request id");
                }
            }
        }

        (None, None) => {
            debug!(peer = %label, "rpc reader: message with neither method nor id, skipping");
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn serialize(value: &Value) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| AppError::Acp(format!("failed to serialise outbound message: {e}")))
}

fn closed_error() -> AppError {
    AppError::Acp("connection closed".into())
}

fn lock_pending(
    pending: &PendingMap,
) -> Result<std::sync::MutexGuard<'_, Option<HashMap<u64, oneshot::Sender<Result<Value>>>>>> {
    pending
        .lock()
        .map_err(|_| AppError::Acp("rpc pending map mutex poisoned".into()))
}

/// Fail every in-flight request and bar new registrations.
fn fail_pending(pending: &PendingMap) {
    if let Ok(mut guard) = lock_pending(pending) {
        if let Some(map) = guard.take() {
            for (_, tx) in map {
                let _ = tx.send(Err(closed_error()));
            }
        }
    }
}
