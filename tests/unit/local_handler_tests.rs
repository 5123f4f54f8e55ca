//! Unit tests for the local callback handler.

use std::sync::Arc;

use agent_conduit::acp::types::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, ReadTextFileRequest,
    RequestPermissionRequest, WriteTextFileRequest,
};
use agent_conduit::handler::ClientCallbackHandler;
use agent_conduit::local::{preferred_allow_option, LocalCallbackHandler};
use agent_conduit::terminal::TerminalManager;

fn option(id: &str, kind: PermissionOptionKind) -> PermissionOption {
    PermissionOption {
        option_id: id.into(),
        name: None,
        kind,
    }
}

fn handler(auto_approve: bool) -> LocalCallbackHandler {
    LocalCallbackHandler::new(Arc::new(TerminalManager::new()), auto_approve)
}

fn permission_request(options: Vec<PermissionOption>) -> RequestPermissionRequest {
    RequestPermissionRequest {
        session_id: "sess-1".into(),
        tool_call: None,
        options,
    }
}

// ── Permission handling ──────────────────────────────────────────────────────

/// Auto-approve picks the first allow-flavoured option even when a reject
/// option is listed first.
#[test]
fn preferred_allow_option_skips_reject_options() {
    let options = vec![
        option("reject", PermissionOptionKind::RejectOnce),
        option("allow", PermissionOptionKind::AllowOnce),
    ];

    let picked = preferred_allow_option(&options).expect("option expected");
    assert_eq!(picked.option_id, "allow");
}

/// With no allow-flavoured option present, the first option is used.
#[test]
fn preferred_allow_option_falls_back_to_first() {
    let options = vec![
        option("reject-once", PermissionOptionKind::RejectOnce),
        option("reject-always", PermissionOptionKind::RejectAlways),
    ];

    let picked = preferred_allow_option(&options).expect("option expected");
    assert_eq!(picked.option_id, "reject-once");
}

/// Auto-approve mode selects an allow option.
#[tokio::test]
async fn auto_approve_selects_allow_option() {
    let handler = handler(true);
    let request = permission_request(vec![
        option("reject", PermissionOptionKind::RejectOnce),
        option("allow", PermissionOptionKind::AllowAlways),
    ]);

    let response = handler
        .request_permission(request)
        .await
        .expect("permission must resolve");

    assert!(matches!(
        response.outcome,
        PermissionOutcome::Selected { option_id } if option_id == "allow"
    ));
}

/// Without auto-approve there is nobody to ask, so the request resolves
/// as cancelled rather than hanging.
#[tokio::test]
async fn interactive_request_without_handler_is_cancelled() {
    let handler = handler(false);
    let request = permission_request(vec![option("allow", PermissionOptionKind::AllowOnce)]);

    let response = handler
        .request_permission(request)
        .await
        .expect("permission must resolve");

    assert!(matches!(response.outcome, PermissionOutcome::Cancelled));
}

// ── File access ──────────────────────────────────────────────────────────────

/// A read without a window returns the whole file.
#[tokio::test]
async fn read_text_file_returns_full_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "alpha\nbeta\ngamma\n").expect("write fixture");

    let response = handler(false)
        .read_text_file(ReadTextFileRequest {
            session_id: None,
            path: path.display().to_string(),
            line: None,
            limit: None,
        })
        .await
        .expect("read must succeed");

    assert_eq!(response.content, "alpha\nbeta\ngamma\n");
}

/// `line` and `limit` select a 1-based window of lines.
#[tokio::test]
async fn read_text_file_windows_by_line_and_limit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "one\ntwo\nthree\nfour").expect("write fixture");

    let response = handler(false)
        .read_text_file(ReadTextFileRequest {
            session_id: None,
            path: path.display().to_string(),
            line: Some(2),
            limit: Some(2),
        })
        .await
        .expect("read must succeed");

    assert_eq!(response.content, "two\nthree");
}

/// A window past the end of the file clamps instead of erroring.
#[tokio::test]
async fn read_text_file_clamps_window_past_eof() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("short.txt");
    std::fs::write(&path, "only").expect("write fixture");

    let response = handler(false)
        .read_text_file(ReadTextFileRequest {
            session_id: None,
            path: path.display().to_string(),
            line: Some(10),
            limit: Some(5),
        })
        .await
        .expect("read must succeed");

    assert_eq!(response.content, "");
}

/// Reading a missing file reports an I/O error naming the path.
#[tokio::test]
async fn read_text_file_reports_missing_path() {
    let err = handler(false)
        .read_text_file(ReadTextFileRequest {
            session_id: None,
            path: "/nonexistent/conduit/test.txt".into(),
            line: None,
            limit: None,
        })
        .await
        .expect_err("read must fail");

    assert!(
        err.to_string().contains("/nonexistent/conduit/test.txt"),
        "error must name the path: {err}"
    );
}

/// Writes create missing parent directories.
#[tokio::test]
async fn write_text_file_creates_parent_dirs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("deep").join("out.txt");

    handler(false)
        .write_text_file(WriteTextFileRequest {
            session_id: None,
            path: path.display().to_string(),
            content: "payload".into(),
        })
        .await
        .expect("write must succeed");

    assert_eq!(
        std::fs::read_to_string(&path).expect("file must exist"),
        "payload"
    );
}
