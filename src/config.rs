//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::policy::PermissionsConfig;
use crate::{AppError, Result};

/// How to launch one agent subprocess.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent binary (e.g. `claude-code-acp`).
    pub command: String,
    /// Arguments passed to the binary.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables merged over the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory; defaults to the workspace root.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// Timeout values (milliseconds) for shutdown flows.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// How long `close` waits for the agent to exit before force-killing.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Grace between a terminal SIGTERM and the forced kill.
    #[serde(default = "default_terminal_kill_grace_ms")]
    pub terminal_kill_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: default_shutdown_grace_ms(),
            terminal_kill_grace_ms: default_terminal_kill_grace_ms(),
        }
    }
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_terminal_kill_grace_ms() -> u64 {
    3000
}

/// Embedded terminal settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TerminalConfig {
    /// Per-terminal output retention cap in bytes.
    #[serde(default = "default_output_byte_limit")]
    pub default_output_byte_limit: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            default_output_byte_limit: default_output_byte_limit(),
        }
    }
}

fn default_output_byte_limit() -> u64 {
    1_048_576
}

/// Activity log settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ActivityConfig {
    /// Whether tool-call activity recording is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory for daily JSONL activity files, relative to the workspace
    /// root unless absolute.
    #[serde(default = "default_activity_dir")]
    pub dir: PathBuf,
    /// Tool names whose observed calls are recorded.
    #[serde(default)]
    pub known_tools: Vec<String>,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            dir: default_activity_dir(),
            known_tools: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_activity_dir() -> PathBuf {
    PathBuf::from(".conduit/activity")
}

fn default_ipc_name() -> String {
    "agent-conduit".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Workspace root used as the default agent working directory.
    pub default_workspace_root: PathBuf,
    /// Default agent launch settings.
    pub agent: AgentConfig,
    /// Named agent overrides, keyed by connection name.
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    /// Unix socket / named pipe identifier for the gateway lease endpoint.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Auto-approve permission requests handled locally.
    #[serde(default)]
    pub auto_approve: bool,
    /// Shutdown and kill grace windows.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Embedded terminal settings.
    #[serde(default)]
    pub terminal: TerminalConfig,
    /// Tool-call activity recording.
    #[serde(default)]
    pub activity: ActivityConfig,
    /// Tool permission rules applied before any permission request is routed.
    #[serde(default)]
    pub permissions: Option<PermissionsConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Agent settings for a named connection, falling back to the default.
    #[must_use]
    pub fn agent_for(&self, name: &str) -> &AgentConfig {
        self.agents.get(name).unwrap_or(&self.agent)
    }

    /// Absolute path of the activity log directory.
    #[must_use]
    pub fn activity_dir(&self) -> PathBuf {
        if self.activity.dir.is_absolute() {
            self.activity.dir.clone()
        } else {
            self.default_workspace_root.join(&self.activity.dir)
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }
        for (name, agent) in &self.agents {
            if agent.command.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "agents.{name}.command must not be empty"
                )));
            }
        }

        if self.terminal.default_output_byte_limit == 0 {
            return Err(AppError::Config(
                "terminal.default_output_byte_limit must be greater than zero".into(),
            ));
        }

        let canonical_root = self
            .default_workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("default_workspace_root invalid: {err}")))?;
        self.default_workspace_root = canonical_root;

        Ok(())
    }
}
