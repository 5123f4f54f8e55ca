//! Wire types for the bridged protocol subset.
//!
//! Field names follow the wire format (camelCase). Only the messages the
//! bridge actually moves are typed here: the handshake, session lifecycle,
//! prompt/cancel, session updates, permission requests, file I/O, and the
//! terminal operations. Session updates the bridge does not understand are
//! preserved verbatim through an untagged fallback so they survive
//! forwarding to a peer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version this client declares during the handshake.
pub const PROTOCOL_VERSION: u16 = 1;

/// Wire method names.
pub mod method {
    /// Handshake request (client → agent, and peer → gateway).
    pub const INITIALIZE: &str = "initialize";
    /// Authentication request.
    pub const AUTHENTICATE: &str = "authenticate";
    /// Create a new session.
    pub const SESSION_NEW: &str = "session/new";
    /// Load a previously persisted session.
    pub const SESSION_LOAD: &str = "session/load";
    /// Send a prompt turn.
    pub const SESSION_PROMPT: &str = "session/prompt";
    /// Cancel the in-flight turn (notification).
    pub const SESSION_CANCEL: &str = "session/cancel";
    /// Session progress notification (agent → client).
    pub const SESSION_UPDATE: &str = "session/update";
    /// Switch the session mode.
    pub const SESSION_SET_MODE: &str = "session/set_mode";
    /// Set a session config option.
    pub const SESSION_SET_CONFIG_OPTION: &str = "session/set_config_option";
    /// Tool permission request (agent → client).
    pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";
    /// Read a text file on the client side (agent → client).
    pub const FS_READ_TEXT_FILE: &str = "fs/read_text_file";
    /// Write a text file on the client side (agent → client).
    pub const FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";
    /// Spawn a client-side terminal (agent → client).
    pub const TERMINAL_CREATE: &str = "terminal/create";
    /// Fetch buffered terminal output (agent → client).
    pub const TERMINAL_OUTPUT: &str = "terminal/output";
    /// Await terminal exit (agent → client).
    pub const TERMINAL_WAIT_FOR_EXIT: &str = "terminal/wait_for_exit";
    /// Terminate a terminal (agent → client).
    pub const TERMINAL_KILL: &str = "terminal/kill";
    /// Release a terminal id (agent → client).
    pub const TERMINAL_RELEASE: &str = "terminal/release";
}

// ── Handshake ────────────────────────────────────────────────────────────────

/// File-system capability flags declared by a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FsCapabilities {
    /// Client can serve `fs/read_text_file`.
    pub read_text_file: bool,
    /// Client can serve `fs/write_text_file`.
    pub write_text_file: bool,
}

/// Capability flags declared by a client during the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientCapabilities {
    /// File-system capabilities.
    pub fs: FsCapabilities,
    /// Client can serve the `terminal/*` family.
    pub terminal: bool,
}

impl ClientCapabilities {
    /// Full capability set — what this bridge declares to the agent.
    #[must_use]
    pub fn full() -> Self {
        Self {
            fs: FsCapabilities {
                read_text_file: true,
                write_text_file: true,
            },
            terminal: true,
        }
    }
}

/// Identity of one protocol participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Machine-readable name.
    pub name: String,
    /// Optional human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Version string.
    pub version: String,
}

/// Capability flags declared by the agent in its handshake response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentCapabilities {
    /// Agent supports `session/load`.
    pub load_session: bool,
    /// Flags this bridge does not interpret but must replay to a peer.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `initialize` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    /// Declared protocol version.
    pub protocol_version: u16,
    /// Capabilities the client offers to serve.
    pub client_capabilities: ClientCapabilities,
    /// Client identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Implementation>,
}

/// `initialize` response parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// Protocol version the agent speaks.
    pub protocol_version: u16,
    /// Agent capability flags.
    #[serde(default)]
    pub agent_capabilities: AgentCapabilities,
    /// Agent identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_info: Option<Implementation>,
    /// Authentication methods the agent accepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_methods: Option<Value>,
}

/// `authenticate` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    /// One of the agent's advertised auth method ids.
    pub method_id: String,
}

// ── Session lifecycle ────────────────────────────────────────────────────────

/// `session/new` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionRequest {
    /// Working directory for the session.
    pub cwd: String,
    /// MCP server descriptors passed through to the agent, if any.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// `session/new` response parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    /// Agent-assigned session identifier.
    pub session_id: String,
    /// Session mode state, opaque to the bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<Value>,
    /// Session config options, opaque to the bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_options: Option<Value>,
}

/// `session/load` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionRequest {
    /// Identifier of the session to restore.
    pub session_id: String,
    /// Working directory for the restored session.
    pub cwd: String,
    /// MCP server descriptors.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// `session/set_mode` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSessionModeRequest {
    /// Target session.
    pub session_id: String,
    /// Mode to activate.
    pub mode_id: String,
}

/// `session/set_config_option` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSessionConfigOptionRequest {
    /// Target session.
    pub session_id: String,
    /// Config option identifier.
    pub config_id: String,
    /// New value.
    pub value: String,
}

// ── Prompt ───────────────────────────────────────────────────────────────────

/// One block of prompt or message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text payload.
        text: String,
    },
    /// Any content kind this bridge does not interpret.
    #[serde(other)]
    Other,
}

/// `session/prompt` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    /// Target session.
    pub session_id: String,
    /// Prompt content blocks.
    pub prompt: Vec<ContentBlock>,
}

impl PromptRequest {
    /// Convenience constructor for a single text block.
    #[must_use]
    pub fn text(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}

/// `session/prompt` response parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    /// Why the turn ended (`end_turn`, `cancelled`, …).
    pub stop_reason: String,
}

/// `session/cancel` notification parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelNotification {
    /// Session whose in-flight turn should stop.
    pub session_id: String,
}

// ── Session updates ──────────────────────────────────────────────────────────

/// A tool call reported inside a session update or permission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallUpdate {
    /// Correlation id for this tool call.
    pub tool_call_id: String,
    /// Human-readable title, e.g. `"Bash: npm run build"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Tool kind (`read`, `edit`, `execute`, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Fields this bridge does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Session update kinds the bridge understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum KnownUpdate {
    /// A chunk of the agent's streamed reply.
    AgentMessageChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// A chunk of the agent's reasoning stream.
    AgentThoughtChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// A tool call started.
    ToolCall(ToolCallUpdate),
    /// A tool call progressed or finished.
    ToolCallUpdate(ToolCallUpdate),
}

/// One session update: a known kind, or raw JSON preserved for forwarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionUpdate {
    /// An update kind the bridge interprets.
    Known(KnownUpdate),
    /// Anything else, passed through verbatim.
    Other(Value),
}

impl SessionUpdate {
    /// The text payload when this is a text message chunk.
    #[must_use]
    pub fn message_text(&self) -> Option<&str> {
        match self {
            Self::Known(KnownUpdate::AgentMessageChunk {
                content: ContentBlock::Text { text },
            }) => Some(text),
            _ => None,
        }
    }

    /// The tool call when this is a tool-call update.
    #[must_use]
    pub fn tool_call(&self) -> Option<&ToolCallUpdate> {
        match self {
            Self::Known(KnownUpdate::ToolCall(tc) | KnownUpdate::ToolCallUpdate(tc)) => Some(tc),
            _ => None,
        }
    }
}

/// `session/update` notification parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session this update belongs to.
    pub session_id: String,
    /// The update payload.
    pub update: SessionUpdate,
}

// ── Permission requests ──────────────────────────────────────────────────────

/// Kind of a permission option offered by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    /// Approve this call only.
    AllowOnce,
    /// Approve this and future matching calls.
    AllowAlways,
    /// Reject this call only.
    RejectOnce,
    /// Reject this and future matching calls.
    RejectAlways,
    /// Any kind this bridge does not interpret.
    #[serde(other)]
    Other,
}

/// One selectable permission option.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Identifier echoed back in the outcome.
    pub option_id: String,
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Option kind.
    pub kind: PermissionOptionKind,
}

/// `session/request_permission` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionRequest {
    /// Session the tool call belongs to.
    pub session_id: String,
    /// The tool call awaiting permission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallUpdate>,
    /// Options the client may select from.
    #[serde(default)]
    pub options: Vec<PermissionOption>,
}

/// Resolution of a permission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PermissionOutcome {
    /// One of the offered options was chosen.
    #[serde(rename_all = "camelCase")]
    Selected {
        /// The chosen option id.
        option_id: String,
    },
    /// The request was dismissed without a selection.
    Cancelled,
}

/// `session/request_permission` response parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionResponse {
    /// The resolution.
    pub outcome: PermissionOutcome,
}

// ── File I/O ─────────────────────────────────────────────────────────────────

/// `fs/read_text_file` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadTextFileRequest {
    /// Session on whose behalf the read happens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Absolute path to read.
    pub path: String,
    /// 1-based first line of the requested window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Maximum number of lines to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// `fs/read_text_file` response parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadTextFileResponse {
    /// File content (possibly windowed).
    pub content: String,
}

/// `fs/write_text_file` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTextFileRequest {
    /// Session on whose behalf the write happens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Absolute path to write.
    pub path: String,
    /// Full new file content.
    pub content: String,
}

/// `fs/write_text_file` response parameters (empty object on the wire).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteTextFileResponse {}

// ── Terminals ────────────────────────────────────────────────────────────────

/// One environment variable override for a terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVariable {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// `terminal/create` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalRequest {
    /// Session on whose behalf the terminal is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Command line, interpreted by the shell.
    pub command: String,
    /// Arguments appended to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides merged over the inherited environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVariable>>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Output ring-buffer limit in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_byte_limit: Option<u64>,
}

/// `terminal/create` response parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalResponse {
    /// Identifier for subsequent terminal operations.
    pub terminal_id: String,
}

/// Exit status of a terminal process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExitStatus {
    /// Process exit code, if it exited normally.
    pub exit_code: Option<i32>,
    /// Terminating signal name, if killed by signal.
    pub signal: Option<String>,
}

/// `terminal/output` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutputRequest {
    /// Owning session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Target terminal.
    pub terminal_id: String,
}

/// `terminal/output` response parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutputResponse {
    /// Concatenated buffered output.
    pub output: String,
    /// True once the buffered total has ever exceeded the byte limit.
    pub truncated: bool,
    /// Present when the process has already exited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<TerminalExitStatus>,
}

/// `terminal/wait_for_exit` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForTerminalExitRequest {
    /// Owning session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Target terminal.
    pub terminal_id: String,
}

/// `terminal/kill` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillTerminalRequest {
    /// Owning session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Target terminal.
    pub terminal_id: String,
}

/// `terminal/kill` response parameters (empty object on the wire).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KillTerminalResponse {}

/// `terminal/release` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseTerminalRequest {
    /// Owning session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Target terminal.
    pub terminal_id: String,
}

/// `terminal/release` response parameters (empty object on the wire).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseTerminalResponse {}
