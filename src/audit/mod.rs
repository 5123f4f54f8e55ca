//! Structured activity recording for observed agent events.
//!
//! Provides the [`ActivityRecorder`] trait and associated types. The
//! primary implementation, [`JsonlActivityRecorder`], appends JSONL
//! records to daily-rotating files. [`ToolCallObserver`] watches session
//! updates for known tool calls and records them.

pub mod observer;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type classification for activity entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityEventType {
    /// A known tool call observed in the session update stream.
    ToolCall,
    /// A tool permission request resolved by policy.
    PolicyDecision,
    /// Agent connection established.
    ConnectionStart,
    /// Agent connection closed.
    ConnectionClose,
}

/// A structured record of one observed agent event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// ISO 8601 timestamp with timezone.
    pub timestamp: DateTime<Utc>,
    /// Connection name the event belongs to.
    pub connection: Option<String>,
    /// Associated session identifier.
    pub session_id: Option<String>,
    /// Event classification.
    pub event_type: ActivityEventType,
    /// Tool title or name, secrets redacted.
    pub tool: Option<String>,
    /// Tool call identifier.
    pub tool_call_id: Option<String>,
    /// Policy rule that matched (for `policy_decision` events).
    pub matched_rule: Option<String>,
    /// Brief result or decision description.
    pub detail: Option<String>,
}

impl ActivityEntry {
    /// Construct a minimal entry for the given event type.
    #[must_use]
    pub fn new(event_type: ActivityEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            connection: None,
            session_id: None,
            event_type,
            tool: None,
            tool_call_id: None,
            matched_rule: None,
            detail: None,
        }
    }

    /// Set the connection name.
    #[must_use]
    pub fn with_connection(mut self, connection: String) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Set the session identifier.
    #[must_use]
    pub fn with_session(mut self, session_id: String) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Set the tool title or name.
    #[must_use]
    pub fn with_tool(mut self, tool: String) -> Self {
        self.tool = Some(tool);
        self
    }

    /// Set the tool call identifier.
    #[must_use]
    pub fn with_tool_call_id(mut self, tool_call_id: String) -> Self {
        self.tool_call_id = Some(tool_call_id);
        self
    }

    /// Set the matched policy rule.
    #[must_use]
    pub fn with_matched_rule(mut self, rule: String) -> Self {
        self.matched_rule = Some(rule);
        self
    }

    /// Set the detail text.
    #[must_use]
    pub fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Writes activity entries to a persistent store.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait ActivityRecorder: Send + Sync {
    /// Record a single activity entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn record(&self, entry: ActivityEntry) -> crate::Result<()>;
}

pub use observer::ToolCallObserver;
pub use writer::JsonlActivityRecorder;
