//! Permission policy enforcer.
//!
//! Evaluates tool permission requests against configured allow/deny/ask
//! rule lists before they reach any interactive handler. Rules use the
//! permission pattern syntax: `*`, `ToolName`, `Tool(specifier glob)`,
//! `mcp__server`, `mcp__server__tool`.
//!
//! Evaluation order is deny, then ask, then allow; deny always wins.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::acp::types::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, ToolCallUpdate,
};

/// Allow/deny/ask rule lists plus the fallback mode for unmatched calls.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionsConfig {
    /// Patterns resolved without asking.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Patterns rejected without asking. Deny wins over everything.
    #[serde(default)]
    pub deny: Vec<String>,
    /// Patterns that always go to an interactive handler.
    #[serde(default)]
    pub ask: Vec<String>,
    /// Fallback when no rule matches: `default` denies,
    /// `bypass_permissions` allows.
    #[serde(default)]
    pub default_mode: Option<String>,
}

/// Minimal tool information extracted from a permission request.
#[derive(Debug, Clone, Default)]
pub struct ToolCallInfo {
    /// Tool kind reported by the agent (`read`, `edit`, `execute`, ...).
    pub kind: Option<String>,
    /// Human-readable title, e.g. `"Bash: npm run build"`.
    pub title: Option<String>,
    /// Tool call id, carried through for the activity trail.
    pub tool_call_id: String,
}

impl ToolCallInfo {
    /// Extract the matching-relevant fields from a wire tool-call update.
    #[must_use]
    pub fn from_update(update: &ToolCallUpdate) -> Self {
        Self {
            kind: update.kind.clone(),
            title: update.title.clone(),
            tool_call_id: update.tool_call_id.clone(),
        }
    }
}

/// What the policy says should happen to a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Resolve with an allow option, no interaction.
    Allow,
    /// Resolve with a reject option (or cancel), no interaction.
    Deny,
    /// Defer to an interactive handler.
    Ask,
}

/// Result of a policy evaluation.
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    /// The action the policy selected.
    pub action: PolicyAction,
    /// The rule pattern that matched, if any.
    pub matched_rule: Option<String>,
}

/// Tool kinds mapped to canonical tool names for pattern matching.
const KIND_TO_TOOL: &[(&str, &str)] = &[
    ("read", "Read"),
    ("edit", "Edit"),
    ("execute", "Bash"),
    ("fetch", "WebFetch"),
    ("search", "WebSearch"),
    ("delete", "Write"),
    ("move", "Write"),
];

/// Evaluates tool permission requests against a [`PermissionsConfig`].
#[derive(Debug, Clone)]
pub struct PolicyEnforcer {
    config: PermissionsConfig,
}

impl PolicyEnforcer {
    /// Build an enforcer over the given rule lists.
    #[must_use]
    pub fn new(config: PermissionsConfig) -> Self {
        Self { config }
    }

    /// Replace the rule lists.
    pub fn update_config(&mut self, config: PermissionsConfig) {
        self.config = config;
        debug!("permission policy config updated");
    }

    /// The active rule lists.
    #[must_use]
    pub fn config(&self) -> &PermissionsConfig {
        &self.config
    }

    /// Evaluate one tool call.
    ///
    /// Order: deny, ask, allow, then the `default_mode` fallback
    /// (`bypass_permissions` allows, anything else denies).
    #[must_use]
    pub fn evaluate(&self, tool_call: &ToolCallInfo) -> PolicyDecision {
        let tool_name = extract_tool_name(tool_call);
        let tool_arg = extract_tool_arg(tool_call);

        if let Some(rule) = match_list(&self.config.deny, &tool_name, tool_arg.as_deref()) {
            return decision(PolicyAction::Deny, Some(rule));
        }
        if let Some(rule) = match_list(&self.config.ask, &tool_name, tool_arg.as_deref()) {
            return decision(PolicyAction::Ask, Some(rule));
        }
        if let Some(rule) = match_list(&self.config.allow, &tool_name, tool_arg.as_deref()) {
            return decision(PolicyAction::Allow, Some(rule));
        }

        let mode = self.config.default_mode.as_deref().unwrap_or("default");
        if mode == "bypass_permissions" {
            decision(PolicyAction::Allow, None)
        } else {
            decision(PolicyAction::Deny, None)
        }
    }

    /// Build a permission outcome from a decision and the offered options.
    ///
    /// Allow picks the first allow-flavoured option; deny picks the first
    /// reject-flavoured option, falling back to cancelled. Ask yields
    /// cancelled so the caller keeps routing the request.
    #[must_use]
    pub fn build_outcome(
        decision: &PolicyDecision,
        options: &[PermissionOption],
    ) -> PermissionOutcome {
        match decision.action {
            PolicyAction::Allow => {
                if let Some(opt) = options.iter().find(|o| {
                    matches!(
                        o.kind,
                        PermissionOptionKind::AllowOnce | PermissionOptionKind::AllowAlways
                    )
                }) {
                    return PermissionOutcome::Selected {
                        option_id: opt.option_id.clone(),
                    };
                }
                PermissionOutcome::Cancelled
            }
            PolicyAction::Deny => {
                if let Some(opt) = options.iter().find(|o| {
                    matches!(
                        o.kind,
                        PermissionOptionKind::RejectOnce | PermissionOptionKind::RejectAlways
                    )
                }) {
                    return PermissionOutcome::Selected {
                        option_id: opt.option_id.clone(),
                    };
                }
                PermissionOutcome::Cancelled
            }
            PolicyAction::Ask => PermissionOutcome::Cancelled,
        }
    }
}

fn decision(action: PolicyAction, matched_rule: Option<String>) -> PolicyDecision {
    PolicyDecision {
        action,
        matched_rule,
    }
}

// ── Tool info extraction ─────────────────────────────────────────────────────

/// Derive the tool name from the title prefix, falling back to the kind
/// mapping, then to the raw kind.
fn extract_tool_name(tool_call: &ToolCallInfo) -> String {
    if let Some(title) = &tool_call.title {
        if let Some(colon_idx) = title.find(':') {
            if colon_idx > 0 {
                let prefix = title[..colon_idx].trim();
                if is_identifier(prefix) {
                    return prefix.to_owned();
                }
            }
        }
        // Verb-style titles such as "Write to /src/foo.ts".
        for verb in ["Write", "Read", "Edit", "MultiEdit"] {
            if starts_with_word_ci(title, verb) {
                return (*verb).to_owned();
            }
        }
    }

    if let Some(kind) = &tool_call.kind {
        if let Some((_, tool)) = KIND_TO_TOOL.iter().find(|(k, _)| k == kind) {
            return (*tool).to_owned();
        }
    }

    tool_call.kind.clone().unwrap_or_else(|| "unknown".into())
}

/// Derive the tool argument from the title suffix.
fn extract_tool_arg(tool_call: &ToolCallInfo) -> Option<String> {
    let title = tool_call.title.as_deref()?;
    if let Some(colon_idx) = title.find(':') {
        if colon_idx > 0 {
            return Some(title[colon_idx + 1..].trim().to_owned());
        }
    }
    for verb in ["Write", "Read", "Edit"] {
        if starts_with_word_ci(title, verb) {
            let rest = title[verb.len()..].trim_start();
            let rest = rest.strip_prefix("to ").unwrap_or(rest).trim();
            if !rest.is_empty() {
                return Some(rest.to_owned());
            }
        }
    }
    None
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn starts_with_word_ci(s: &str, word: &str) -> bool {
    if s.len() < word.len() || !s[..word.len()].eq_ignore_ascii_case(word) {
        return false;
    }
    s[word.len()..]
        .chars()
        .next()
        .is_none_or(|c| !c.is_ascii_alphanumeric() && c != '_')
}

// ── Pattern matching ─────────────────────────────────────────────────────────

/// Return the first pattern in `list` matching the tool name and argument.
fn match_list(list: &[String], tool_name: &str, tool_arg: Option<&str>) -> Option<String> {
    list.iter()
        .find(|pattern| match_pattern(pattern, tool_name, tool_arg))
        .cloned()
}

/// Match one permission pattern against tool name + argument.
fn match_pattern(pattern: &str, tool_name: &str, tool_arg: Option<&str>) -> bool {
    if pattern == "*" {
        return true;
    }

    // MCP patterns: "mcp__server" or "mcp__server__tool".
    if pattern.starts_with("mcp__") {
        let lower_name = tool_name.to_lowercase();
        let lower_pattern = pattern.to_lowercase();
        return lower_name == lower_pattern
            || lower_name.starts_with(&format!("{lower_pattern}__"));
    }

    // Tool(specifier) patterns.
    if let Some(paren_idx) = pattern.find('(') {
        if paren_idx > 0 && pattern.ends_with(')') {
            let pattern_tool = &pattern[..paren_idx];
            let specifier = &pattern[paren_idx + 1..pattern.len() - 1];

            if !pattern_tool.eq_ignore_ascii_case(tool_name) {
                return false;
            }
            let Some(arg) = tool_arg else {
                return false;
            };
            return specifier_matches(specifier, arg);
        }
    }

    pattern.eq_ignore_ascii_case(tool_name)
}

/// Glob-match a specifier against a tool argument: `*` stays within a path
/// segment, `**` crosses separators, comparison is case-insensitive.
fn specifier_matches(specifier: &str, arg: &str) -> bool {
    let options = glob::MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    match glob::Pattern::new(specifier) {
        Ok(pattern) => pattern.matches_with(arg, options),
        Err(err) => {
            warn!(specifier = %specifier, %err, "invalid permission glob, treating as no match");
            false
        }
    }
}
