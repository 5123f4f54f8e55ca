//! Unit tests for the tool-call observer and token redaction.

use std::sync::{Arc, Mutex};

use serde_json::json;

use agent_conduit::audit::observer::redact_tokens;
use agent_conduit::audit::{ActivityEntry, ActivityEventType, ActivityRecorder, ToolCallObserver};
use agent_conduit::acp::types::SessionNotification;
use agent_conduit::Result;

/// Captures recorded entries for assertion.
#[derive(Default)]
struct CapturingRecorder {
    entries: Mutex<Vec<ActivityEntry>>,
}

impl CapturingRecorder {
    fn take(&self) -> Vec<ActivityEntry> {
        self.entries.lock().expect("lock").drain(..).collect()
    }
}

impl ActivityRecorder for CapturingRecorder {
    fn record(&self, entry: ActivityEntry) -> Result<()> {
        self.entries.lock().expect("lock").push(entry);
        Ok(())
    }
}

fn tool_call_notification(title: &str) -> SessionNotification {
    serde_json::from_value(json!({
        "sessionId": "sess-1",
        "update": {
            "sessionUpdate": "tool_call",
            "toolCallId": "call-1",
            "title": title,
            "kind": "execute"
        }
    }))
    .expect("notification must parse")
}

// ── Token redaction ──────────────────────────────────────────────────────────

/// Token values after `--token` are masked in all common spellings.
#[test]
fn redact_tokens_masks_common_forms() {
    let cases = [
        ("deploy --token abc123 --dry-run", "deploy --token [REDACTED] --dry-run"),
        ("deploy --token=abc123", "deploy --token [REDACTED]"),
        ("deploy --TOKEN \"se cret\"", "deploy --token [REDACTED]"),
        ("deploy --token 'se cret' now", "deploy --token [REDACTED] now"),
    ];

    for (input, expected) in cases {
        assert_eq!(redact_tokens(input), expected, "input: {input}");
    }
}

/// Titles without a token flag pass through unchanged.
#[test]
fn redact_tokens_leaves_clean_titles_alone() {
    assert_eq!(redact_tokens("Bash: npm run build"), "Bash: npm run build");
}

// ── Known-tool matching ──────────────────────────────────────────────────────

/// A tool registered with underscores also matches its spaced form,
/// case-insensitively.
#[test]
fn is_known_tool_matches_spaced_and_cased_variants() {
    let observer = ToolCallObserver::new(&["canvas_update".to_owned()], None, "primary");

    assert!(observer.is_known_tool("canvas_update"));
    assert!(observer.is_known_tool("Canvas Update: resize frame"));
    assert!(observer.is_known_tool("running CANVAS_UPDATE now"));
    assert!(!observer.is_known_tool("canvas repaint"));
}

// ── Observation ──────────────────────────────────────────────────────────────

/// A known tool-call start is recorded with a redacted title.
#[test]
fn observe_records_known_tool_call_with_redacted_title() {
    let recorder = Arc::new(CapturingRecorder::default());
    let observer = ToolCallObserver::new(
        &["deploy".to_owned()],
        Some(Arc::clone(&recorder) as Arc<dyn ActivityRecorder>),
        "primary",
    );

    observer.observe(&tool_call_notification("deploy --token hunter2 --env prod"));

    let entries = recorder.take();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.event_type, ActivityEventType::ToolCall);
    assert_eq!(entry.connection.as_deref(), Some("primary"));
    assert_eq!(entry.session_id.as_deref(), Some("sess-1"));
    assert_eq!(entry.tool_call_id.as_deref(), Some("call-1"));
    assert_eq!(
        entry.tool.as_deref(),
        Some("deploy --token [REDACTED] --env prod")
    );
}

/// Unknown tool titles are ignored.
#[test]
fn observe_ignores_unknown_tools() {
    let recorder = Arc::new(CapturingRecorder::default());
    let observer = ToolCallObserver::new(
        &["deploy".to_owned()],
        Some(Arc::clone(&recorder) as Arc<dyn ActivityRecorder>),
        "primary",
    );

    observer.observe(&tool_call_notification("Bash: npm run build"));

    assert!(recorder.take().is_empty());
}

/// Progress updates for an already-started tool call are not re-recorded;
/// only the `tool_call` start event counts.
#[test]
fn observe_ignores_tool_call_updates() {
    let recorder = Arc::new(CapturingRecorder::default());
    let observer = ToolCallObserver::new(
        &["deploy".to_owned()],
        Some(Arc::clone(&recorder) as Arc<dyn ActivityRecorder>),
        "primary",
    );

    let update: SessionNotification = serde_json::from_value(json!({
        "sessionId": "sess-1",
        "update": {
            "sessionUpdate": "tool_call_update",
            "toolCallId": "call-1",
            "title": "deploy --env prod",
            "status": "in_progress"
        }
    }))
    .expect("notification must parse");

    observer.observe(&update);

    assert!(recorder.take().is_empty());
}

/// Non-tool updates such as message chunks are ignored.
#[test]
fn observe_ignores_message_chunks() {
    let recorder = Arc::new(CapturingRecorder::default());
    let observer = ToolCallObserver::new(
        &["deploy".to_owned()],
        Some(Arc::clone(&recorder) as Arc<dyn ActivityRecorder>),
        "primary",
    );

    let chunk: SessionNotification = serde_json::from_value(json!({
        "sessionId": "sess-1",
        "update": {
            "sessionUpdate": "agent_message_chunk",
            "content": { "type": "text", "text": "deploy finished" }
        }
    }))
    .expect("notification must parse");

    observer.observe(&chunk);

    assert!(recorder.take().is_empty());
}
