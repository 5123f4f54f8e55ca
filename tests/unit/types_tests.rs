//! Unit tests for wire type serialization.
//!
//! The wire format is camelCase; unknown session updates and capability
//! flags must survive a decode/encode cycle so forwarding to a peer is
//! lossless.

use serde_json::json;

use agent_conduit::acp::types::{
    ClientCapabilities, InitializeRequest, InitializeResponse, KnownUpdate, PermissionOutcome,
    PromptRequest, RequestPermissionRequest, RequestPermissionResponse, SessionNotification,
    SessionUpdate, PROTOCOL_VERSION,
};

// ── Handshake ────────────────────────────────────────────────────────────────

/// The initialize request serializes with camelCase keys and the full
/// client capability set.
#[test]
fn initialize_request_uses_camel_case() {
    let request = InitializeRequest {
        protocol_version: PROTOCOL_VERSION,
        client_capabilities: ClientCapabilities::full(),
        client_info: None,
    };

    let value = serde_json::to_value(&request).expect("serialize");

    assert_eq!(value["protocolVersion"], json!(1));
    assert_eq!(value["clientCapabilities"]["fs"]["readTextFile"], json!(true));
    assert_eq!(value["clientCapabilities"]["fs"]["writeTextFile"], json!(true));
    assert_eq!(value["clientCapabilities"]["terminal"], json!(true));
}

/// Agent capability flags this bridge does not interpret are preserved
/// through the flattened extra map, so a replay to a peer is lossless.
#[test]
fn unknown_agent_capabilities_survive_roundtrip() {
    let raw = json!({
        "protocolVersion": 1,
        "agentCapabilities": {
            "loadSession": true,
            "promptCapabilities": { "image": true }
        },
        "agentInfo": { "name": "fake-agent", "version": "1.2.3" }
    });

    let response: InitializeResponse = serde_json::from_value(raw).expect("deserialize");
    assert!(response.agent_capabilities.load_session);

    let back = serde_json::to_value(&response).expect("serialize");
    assert_eq!(
        back["agentCapabilities"]["promptCapabilities"]["image"],
        json!(true)
    );
}

// ── Session updates ──────────────────────────────────────────────────────────

/// A text message chunk parses into the known variant and exposes its
/// text through the helper.
#[test]
fn message_chunk_parses_as_known_update() {
    let raw = json!({
        "sessionId": "sess-1",
        "update": {
            "sessionUpdate": "agent_message_chunk",
            "content": { "type": "text", "text": "hello" }
        }
    });

    let notification: SessionNotification = serde_json::from_value(raw).expect("deserialize");

    assert_eq!(notification.session_id, "sess-1");
    assert_eq!(notification.update.message_text(), Some("hello"));
}

/// A tool-call update exposes its id, title, and kind.
#[test]
fn tool_call_update_parses_as_known_update() {
    let raw = json!({
        "sessionId": "sess-1",
        "update": {
            "sessionUpdate": "tool_call",
            "toolCallId": "call-1",
            "title": "Bash: npm run build",
            "kind": "execute"
        }
    });

    let notification: SessionNotification = serde_json::from_value(raw).expect("deserialize");
    let tool_call = notification.update.tool_call().expect("tool call present");

    assert_eq!(tool_call.tool_call_id, "call-1");
    assert_eq!(tool_call.title.as_deref(), Some("Bash: npm run build"));
    assert_eq!(tool_call.kind.as_deref(), Some("execute"));
    assert!(matches!(
        notification.update,
        SessionUpdate::Known(KnownUpdate::ToolCall(_))
    ));
}

/// An update kind the bridge does not understand falls back to the raw
/// variant and re-serializes byte-identically.
#[test]
fn unknown_update_kind_is_preserved_verbatim() {
    let raw_update = json!({
        "sessionUpdate": "plan",
        "entries": [{ "content": "step one", "status": "pending" }]
    });
    let raw = json!({ "sessionId": "sess-1", "update": raw_update });

    let notification: SessionNotification =
        serde_json::from_value(raw).expect("deserialize");
    assert!(matches!(notification.update, SessionUpdate::Other(_)));
    assert!(notification.update.message_text().is_none());
    assert!(notification.update.tool_call().is_none());

    let back = serde_json::to_value(&notification).expect("serialize");
    assert_eq!(back["update"], raw_update);
}

// ── Permission outcomes ──────────────────────────────────────────────────────

/// The selected outcome serializes as the nested tagged object the wire
/// expects.
#[test]
fn selected_outcome_serializes_with_option_id() {
    let response = RequestPermissionResponse {
        outcome: PermissionOutcome::Selected {
            option_id: "allow-1".into(),
        },
    };

    let value = serde_json::to_value(&response).expect("serialize");

    assert_eq!(
        value,
        json!({ "outcome": { "outcome": "selected", "optionId": "allow-1" } })
    );
}

/// The cancelled outcome carries no extra fields.
#[test]
fn cancelled_outcome_serializes_bare() {
    let response = RequestPermissionResponse {
        outcome: PermissionOutcome::Cancelled,
    };

    let value = serde_json::to_value(&response).expect("serialize");

    assert_eq!(value, json!({ "outcome": { "outcome": "cancelled" } }));
}

/// A permission request with unknown option kinds still parses; the
/// unknown kind maps to the `Other` fallback.
#[test]
fn permission_request_tolerates_unknown_option_kind() {
    let raw = json!({
        "sessionId": "sess-1",
        "toolCall": { "toolCallId": "call-9", "title": "Bash: rm -rf /tmp/x" },
        "options": [
            { "optionId": "a", "name": "Allow", "kind": "allow_once" },
            { "optionId": "b", "name": "Mystery", "kind": "allow_for_a_while" }
        ]
    });

    let request: RequestPermissionRequest = serde_json::from_value(raw).expect("deserialize");

    assert_eq!(request.options.len(), 2);
    assert_eq!(
        request.tool_call.expect("tool call").title.as_deref(),
        Some("Bash: rm -rf /tmp/x")
    );
}

// ── Prompt ───────────────────────────────────────────────────────────────────

/// The text constructor produces a single text content block.
#[test]
fn prompt_text_constructor_builds_single_block() {
    let request = PromptRequest::text("sess-1", "do the thing");

    let value = serde_json::to_value(&request).expect("serialize");

    assert_eq!(value["sessionId"], json!("sess-1"));
    assert_eq!(
        value["prompt"],
        json!([{ "type": "text", "text": "do the thing" }])
    );
}
