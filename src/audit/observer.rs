//! Session update observer for tool-call activity recording.
//!
//! Watches the `session/update` stream for tool-call starts whose title
//! matches a registered tool name and records them through an
//! [`ActivityRecorder`]. The observer never executes or blocks anything;
//! it exists purely for the activity trail.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use super::{ActivityEntry, ActivityEventType, ActivityRecorder};
use crate::acp::types::{KnownUpdate, SessionNotification, SessionUpdate};

fn token_redaction() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // pattern is a literal, checked by tests
        Regex::new(r#"(?i)--token[\s=]+(?:"[^"]*"|'[^']*'|\S+)"#).unwrap()
    })
}

/// Replace `--token <value>` sequences in a tool title with a placeholder.
#[must_use]
pub fn redact_tokens(title: &str) -> String {
    token_redaction()
        .replace_all(title, "--token [REDACTED]")
        .into_owned()
}

/// Observes session updates for known tool calls and records them.
pub struct ToolCallObserver {
    known_tool_patterns: Vec<String>,
    recorder: Option<Arc<dyn ActivityRecorder>>,
    connection: String,
}

impl ToolCallObserver {
    /// Build an observer for the given connection.
    ///
    /// Each known tool name yields several lowercase match patterns: the
    /// name itself and its underscores-to-spaces form, so titles like
    /// `canvas update` match a tool registered as `canvas_update`.
    #[must_use]
    pub fn new(
        known_tool_names: &[String],
        recorder: Option<Arc<dyn ActivityRecorder>>,
        connection: impl Into<String>,
    ) -> Self {
        let mut patterns = Vec::new();
        for name in known_tool_names {
            let lower = name.to_lowercase();
            let spaced = lower.replace('_', " ");
            if !patterns.contains(&lower) {
                patterns.push(lower);
            }
            if !patterns.contains(&spaced) {
                patterns.push(spaced);
            }
        }
        Self {
            known_tool_patterns: patterns,
            recorder,
            connection: connection.into(),
        }
    }

    /// Whether a tool-call title matches a known tool.
    #[must_use]
    pub fn is_known_tool(&self, title: &str) -> bool {
        let lower = title.to_lowercase();
        self.known_tool_patterns.iter().any(|p| lower.contains(p))
    }

    /// Inspect one session update; record it if it is a known tool-call
    /// start. Recording failures are logged and swallowed.
    pub fn observe(&self, notification: &SessionNotification) {
        let SessionUpdate::Known(KnownUpdate::ToolCall(tool_call)) = &notification.update else {
            return;
        };

        let title = tool_call.title.as_deref().unwrap_or("");
        if !self.is_known_tool(title) {
            return;
        }

        let safe_title = redact_tokens(title);
        debug!(
            connection = %self.connection,
            session_id = %notification.session_id,
            title = %safe_title,
            "known tool call observed"
        );

        if let Some(recorder) = &self.recorder {
            let entry = ActivityEntry::new(ActivityEventType::ToolCall)
                .with_connection(self.connection.clone())
                .with_session(notification.session_id.clone())
                .with_tool(safe_title)
                .with_tool_call_id(tool_call.tool_call_id.clone());
            if let Err(err) = recorder.record(entry) {
                warn!(%err, "failed to record tool call observation");
            }
        }
    }
}
