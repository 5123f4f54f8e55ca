//! Integration tests for the JSON-RPC peer over an in-memory stream.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

use agent_conduit::acp::rpc::{RpcPeer, RpcService};
use agent_conduit::{AppError, Result};

use super::test_helpers::NullService;

type RemoteReader = BufReader<ReadHalf<DuplexStream>>;
type RemoteWriter = WriteHalf<DuplexStream>;

fn spawn_peer(service: Arc<dyn RpcService>) -> (RpcPeer, RemoteReader, RemoteWriter) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(local);
    let peer = RpcPeer::spawn("test", reader, writer, service);
    let (remote_reader, remote_writer) = tokio::io::split(remote);
    (peer, BufReader::new(remote_reader), remote_writer)
}

async fn read_json(reader: &mut RemoteReader) -> Value {
    let mut line = String::new();
    reader.read_line(&mut line).await.expect("read line");
    serde_json::from_str(line.trim_end()).expect("line must be JSON")
}

async fn write_json(writer: &mut RemoteWriter, value: &Value) {
    let mut line = serde_json::to_string(value).expect("serialize");
    line.push('\n');
    writer.write_all(line.as_bytes()).await.expect("write line");
}

/// Echoes request params back as the result.
struct EchoService;

impl RpcService for EchoService {
    fn handle_request(
        &self,
        _method: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        Box::pin(async move { Ok(params) })
    }

    fn handle_notification(
        &self,
        _method: &str,
        _params: Value,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

// ── Outbound requests ────────────────────────────────────────────────────────

/// A request resolves with the result correlated by id.
#[tokio::test]
async fn request_resolves_with_correlated_result() {
    let (peer, mut reader, mut writer) = spawn_peer(Arc::new(NullService));

    let pending = tokio::spawn(async move { peer.request("initialize", json!({"x": 1})).await });

    let request = read_json(&mut reader).await;
    assert_eq!(request["jsonrpc"], "2.0");
    assert_eq!(request["method"], "initialize");
    assert_eq!(request["params"]["x"], 1);
    let id = request["id"].clone();

    write_json(&mut writer, &json!({"jsonrpc": "2.0", "id": id, "result": {"ok": true}})).await;

    let result = pending.await.expect("task").expect("request must succeed");
    assert_eq!(result["ok"], true);
}

/// Responses arriving out of order still reach their own callers.
#[tokio::test]
async fn out_of_order_responses_are_matched_by_id() {
    let (peer, mut reader, mut writer) = spawn_peer(Arc::new(NullService));

    let first = {
        let peer = peer.clone();
        tokio::spawn(async move { peer.request("a", json!({})).await })
    };
    let first_id = read_json(&mut reader).await["id"].clone();
    let second = {
        let peer = peer.clone();
        tokio::spawn(async move { peer.request("b", json!({})).await })
    };
    let second_id = read_json(&mut reader).await["id"].clone();

    write_json(&mut writer, &json!({"jsonrpc": "2.0", "id": second_id, "result": "b"})).await;
    write_json(&mut writer, &json!({"jsonrpc": "2.0", "id": first_id, "result": "a"})).await;

    assert_eq!(first.await.expect("task").expect("first"), json!("a"));
    assert_eq!(second.await.expect("task").expect("second"), json!("b"));
}

/// A JSON-RPC error object surfaces as a protocol error naming code and
/// message.
#[tokio::test]
async fn remote_error_surfaces_code_and_message() {
    let (peer, mut reader, mut writer) = spawn_peer(Arc::new(NullService));

    let pending = tokio::spawn(async move { peer.request("session/new", json!({})).await });

    let id = read_json(&mut reader).await["id"].clone();
    write_json(
        &mut writer,
        &json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32001, "message": "nope"}}),
    )
    .await;

    let err = pending.await.expect("task").expect_err("request must fail");
    match err {
        AppError::Acp(msg) => assert_eq!(msg, "remote error -32001: nope"),
        other => panic!("expected Acp, got {other}"),
    }
}

/// EOF on the stream fails every in-flight request and closes the peer.
#[tokio::test]
async fn eof_fails_pending_requests() {
    let (peer, mut reader, writer) = spawn_peer(Arc::new(NullService));

    let requester = peer.clone();
    let pending = tokio::spawn(async move { requester.request("initialize", json!({})).await });

    // Consume the request, then hang up without answering.
    let _ = read_json(&mut reader).await;
    drop(writer);
    drop(reader);

    let err = pending.await.expect("task").expect_err("request must fail");
    match err {
        AppError::Acp(msg) => assert_eq!(msg, "connection closed"),
        other => panic!("expected Acp, got {other}"),
    }

    peer.closed().await;
    assert!(!peer.is_open());

    // New requests on a closed peer fail immediately.
    let err = peer.request("x", json!({})).await.expect_err("must fail");
    assert!(matches!(err, AppError::Acp(msg) if msg == "connection closed"));
}

// ── Inbound traffic ──────────────────────────────────────────────────────────

/// An inbound request is served by the service and answered with its
/// result.
#[tokio::test]
async fn inbound_request_is_served() {
    let (_peer, mut reader, mut writer) = spawn_peer(Arc::new(EchoService));

    write_json(
        &mut writer,
        &json!({"jsonrpc": "2.0", "id": 9, "method": "anything", "params": {"echo": "me"}}),
    )
    .await;

    let response = read_json(&mut reader).await;
    assert_eq!(response["id"], 9);
    assert_eq!(response["result"]["echo"], "me");
}

/// An unsupported method is answered with the method-not-found code.
#[tokio::test]
async fn unsupported_method_yields_method_not_found() {
    let (_peer, mut reader, mut writer) = spawn_peer(Arc::new(NullService));

    write_json(
        &mut writer,
        &json!({"jsonrpc": "2.0", "id": 4, "method": "no/such", "params": {}}),
    )
    .await;

    let response = read_json(&mut reader).await;
    assert_eq!(response["id"], 4);
    assert_eq!(response["error"]["code"], -32601);
}

/// Malformed lines are skipped; the connection keeps serving.
#[tokio::test]
async fn malformed_line_is_skipped() {
    let (_peer, mut reader, mut writer) = spawn_peer(Arc::new(EchoService));

    writer.write_all(b"this is not json\n").await.expect("write");
    write_json(
        &mut writer,
        &json!({"jsonrpc": "2.0", "id": 5, "method": "still/alive", "params": {}}),
    )
    .await;

    let response = read_json(&mut reader).await;
    assert_eq!(response["id"], 5);
}

/// A notification goes out without an id.
#[tokio::test]
async fn notify_sends_without_id() {
    let (peer, mut reader, _writer) = spawn_peer(Arc::new(NullService));

    peer.notify("session/cancel", json!({"sessionId": "s"}))
        .await
        .expect("notify must succeed");

    let message = read_json(&mut reader).await;
    assert_eq!(message["method"], "session/cancel");
    assert!(message.get("id").is_none(), "notifications carry no id");
}
