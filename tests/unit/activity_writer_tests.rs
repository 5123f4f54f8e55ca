//! Unit tests for the JSONL activity log writer.

use chrono::{DateTime, Utc};

use agent_conduit::audit::{ActivityEntry, ActivityEventType, ActivityRecorder, JsonlActivityRecorder};

/// Recording an entry appends one JSON line to today's dated file.
#[test]
fn record_appends_jsonl_line_to_daily_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let recorder =
        JsonlActivityRecorder::new(dir.path().to_path_buf()).expect("recorder must construct");

    let entry = ActivityEntry::new(ActivityEventType::ToolCall)
        .with_connection("primary".into())
        .with_session("sess-1".into())
        .with_tool("Bash: npm run build".into())
        .with_tool_call_id("call-1".into());
    recorder.record(entry).expect("record must succeed");

    let file = dir
        .path()
        .join(format!("activity-{}.jsonl", Utc::now().date_naive()));
    let contents = std::fs::read_to_string(&file).expect("log file must exist");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1, "exactly one record expected");

    let parsed: serde_json::Value = serde_json::from_str(lines[0]).expect("line must be JSON");
    assert_eq!(parsed["event_type"], "tool_call");
    assert_eq!(parsed["connection"], "primary");
    assert_eq!(parsed["session_id"], "sess-1");
    assert_eq!(parsed["tool"], "Bash: npm run build");
    assert_eq!(parsed["tool_call_id"], "call-1");
}

/// Successive records append, they never truncate earlier lines.
#[test]
fn successive_records_append() {
    let dir = tempfile::tempdir().expect("tempdir");
    let recorder =
        JsonlActivityRecorder::new(dir.path().to_path_buf()).expect("recorder must construct");

    recorder
        .record(ActivityEntry::new(ActivityEventType::ConnectionStart))
        .expect("first record");
    recorder
        .record(
            ActivityEntry::new(ActivityEventType::PolicyDecision)
                .with_matched_rule("Bash(rm *)".into())
                .with_detail("denied".into()),
        )
        .expect("second record");

    let file = dir
        .path()
        .join(format!("activity-{}.jsonl", Utc::now().date_naive()));
    let contents = std::fs::read_to_string(&file).expect("log file must exist");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);

    let second: serde_json::Value = serde_json::from_str(lines[1]).expect("second line JSON");
    assert_eq!(second["event_type"], "policy_decision");
    assert_eq!(second["matched_rule"], "Bash(rm *)");
    assert_eq!(second["detail"], "denied");
}

/// An entry lands in the file named after its own timestamp date, so a
/// date change between records rotates without any writer state.
#[test]
fn entry_files_are_named_from_the_entry_timestamp() {
    let dir = tempfile::tempdir().expect("tempdir");
    let recorder =
        JsonlActivityRecorder::new(dir.path().to_path_buf()).expect("recorder must construct");

    let mut entry = ActivityEntry::new(ActivityEventType::ToolCall);
    entry.timestamp = "2026-01-05T12:00:00Z"
        .parse::<DateTime<Utc>>()
        .expect("timestamp");
    recorder.record(entry).expect("record must succeed");

    assert!(
        dir.path().join("activity-2026-01-05.jsonl").is_file(),
        "file name must follow the entry timestamp"
    );
}

/// The constructor creates the log directory if it does not exist.
#[test]
fn new_creates_missing_log_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nested = dir.path().join("deep").join("activity");

    let recorder = JsonlActivityRecorder::new(nested.clone()).expect("recorder must construct");
    recorder
        .record(ActivityEntry::new(ActivityEventType::ConnectionClose))
        .expect("record must succeed");

    assert!(nested.is_dir(), "log directory must be created");
}
