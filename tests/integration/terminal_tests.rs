#![cfg(unix)]
//! Integration tests for managed terminals: real subprocesses, bounded
//! output, graceful kill, and release finality.

use std::time::Duration;

use agent_conduit::acp::types::CreateTerminalRequest;
use agent_conduit::terminal::TerminalManager;
use agent_conduit::AppError;

use super::test_helpers::wait_until;

fn request(command: &str) -> CreateTerminalRequest {
    CreateTerminalRequest {
        session_id: Some("sess-1".into()),
        command: command.into(),
        args: Vec::new(),
        env: None,
        cwd: None,
        output_byte_limit: None,
    }
}

/// The exit code of a finished command is reported.
#[tokio::test]
async fn wait_for_exit_reports_the_exit_code() {
    let manager = TerminalManager::new();
    let created = manager.create(&request("exit 3")).expect("create");

    let status = manager
        .wait_for_exit(&created.terminal_id)
        .await
        .expect("wait must resolve");

    assert_eq!(status.exit_code, Some(3));
    assert!(status.signal.is_none());
}

/// Waiting repeatedly observes the same resolved status.
#[tokio::test]
async fn repeated_waits_observe_the_same_status() {
    let manager = TerminalManager::new();
    let created = manager.create(&request("exit 0")).expect("create");
    let id = created.terminal_id;

    let first = manager.wait_for_exit(&id).await.expect("first wait");
    let second = manager.wait_for_exit(&id).await.expect("second wait");

    assert_eq!(first.exit_code, Some(0));
    assert_eq!(second.exit_code, Some(0));
}

/// Stdout and stderr both land in the output buffer.
#[tokio::test]
async fn output_captures_stdout_and_stderr() {
    let manager = TerminalManager::new();
    let created = manager
        .create(&request("printf out; printf err >&2"))
        .expect("create");
    let id = created.terminal_id;

    manager.wait_for_exit(&id).await.expect("wait");

    let manager_ref = &manager;
    let id_ref = id.clone();
    let captured = wait_until(Duration::from_secs(2), move || {
        manager_ref
            .output(&id_ref)
            .map(|o| o.output.contains("out") && o.output.contains("err"))
            .unwrap_or(false)
    })
    .await;
    assert!(captured, "both streams must be captured");

    let output = manager.output(&id).expect("output");
    assert!(!output.truncated);
    assert_eq!(output.exit_status.expect("exited").exit_code, Some(0));
}

/// Output past the byte limit evicts the oldest chunks and sets the
/// sticky truncated flag.
#[tokio::test]
async fn over_limit_output_is_truncated_oldest_first() {
    let manager = TerminalManager::new();
    let mut req = request("printf aaaaaaaa; sleep 0.3; printf bbbbbbbb");
    req.output_byte_limit = Some(8);
    let created = manager.create(&req).expect("create");
    let id = created.terminal_id;

    manager.wait_for_exit(&id).await.expect("wait");

    let manager_ref = &manager;
    let id_ref = id.clone();
    let settled = wait_until(Duration::from_secs(2), move || {
        manager_ref
            .output(&id_ref)
            .map(|o| o.output == "bbbbbbbb" && o.truncated)
            .unwrap_or(false)
    })
    .await;
    assert!(settled, "oldest chunk must be evicted and the flag set");
}

/// Kill terminates a long-running command via the graceful signal.
#[tokio::test]
async fn kill_terminates_a_long_running_command() {
    let manager = TerminalManager::new();
    let created = manager.create(&request("sleep 30")).expect("create");
    let id = created.terminal_id;

    manager.kill(&id).expect("kill must succeed");

    let status = tokio::time::timeout(Duration::from_secs(5), manager.wait_for_exit(&id))
        .await
        .expect("exit must resolve well before the sleep ends")
        .expect("wait");

    assert!(status.exit_code.is_none(), "signal deaths have no exit code");
    assert_eq!(status.signal.as_deref(), Some("SIGTERM"));
}

/// Killing an already-finished terminal is a no-op, not an error.
#[tokio::test]
async fn kill_after_exit_is_a_noop() {
    let manager = TerminalManager::new();
    let created = manager.create(&request("exit 0")).expect("create");
    let id = created.terminal_id;

    manager.wait_for_exit(&id).await.expect("wait");
    manager.kill(&id).expect("kill after exit must succeed");
}

/// Release makes the id permanently invalid for every operation.
#[tokio::test]
async fn release_is_final() {
    let manager = TerminalManager::new();
    let created = manager.create(&request("sleep 30")).expect("create");
    let id = created.terminal_id;

    manager.release(&id).expect("release must succeed");

    for err in [
        manager.output(&id).map(|_| ()).expect_err("output"),
        manager.kill(&id).expect_err("kill"),
        manager.wait_for_exit(&id).await.map(|_| ()).expect_err("wait"),
        manager.release(&id).expect_err("second release"),
    ] {
        match err {
            AppError::NotFound(msg) => {
                assert!(msg.contains("not found or already released"), "got: {msg}");
            }
            other => panic!("expected NotFound, got {other}"),
        }
    }
}

/// Operations on an id that never existed are not-found errors.
#[tokio::test]
async fn unknown_id_is_not_found() {
    let manager = TerminalManager::new();

    let err = manager.output("term-ghost").expect_err("must fail");
    assert!(matches!(err, AppError::NotFound(_)));
}

/// Dispose force-kills everything still running.
#[tokio::test]
async fn dispose_all_clears_every_terminal() {
    let manager = TerminalManager::new();
    let a = manager.create(&request("sleep 30")).expect("create a");
    let b = manager.create(&request("sleep 30")).expect("create b");

    manager.dispose_all();

    assert!(manager.output(&a.terminal_id).is_err());
    assert!(manager.output(&b.terminal_id).is_err());
}

/// Declared environment variables reach the spawned command.
#[tokio::test]
async fn env_overrides_reach_the_command() {
    let manager = TerminalManager::new();
    let mut req = request("printf \"$CONDUIT_TEST_VAR\"");
    req.env = Some(vec![agent_conduit::acp::types::EnvVariable {
        name: "CONDUIT_TEST_VAR".into(),
        value: "plumbed".into(),
    }]);
    let created = manager.create(&req).expect("create");
    let id = created.terminal_id;

    manager.wait_for_exit(&id).await.expect("wait");

    let manager_ref = &manager;
    let id_ref = id.clone();
    let seen = wait_until(Duration::from_secs(2), move || {
        manager_ref
            .output(&id_ref)
            .map(|o| o.output == "plumbed")
            .unwrap_or(false)
    })
    .await;
    assert!(seen, "environment override must be visible to the command");
}
