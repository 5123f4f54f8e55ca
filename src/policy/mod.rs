//! Tool permission policy modules.
//!
//! Provides rule configuration (allow/deny/ask lists with tool glob
//! patterns) and the enforcer that evaluates permission requests against
//! them before they reach any interactive handler.

pub mod enforcer;

pub use enforcer::{
    PermissionsConfig, PolicyAction, PolicyDecision, PolicyEnforcer, ToolCallInfo,
};
