//! Governance actions a policy can resolve to.
//!
//! [`Action`] is the full set a rule may name. [`SafeAction`] is the subset
//! permitted for policy defaults: it has no auto-reply variant, so a default
//! can never resolve to automatic execution.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The effect a decision asks the executor to carry out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Inject `value` into the agent's input without asking anyone.
    AutoReply { value: String },
    /// Forward the prompt to a human and wait for their reply.
    RequireHuman,
    /// Refuse the prompt; notify but inject nothing.
    Deny { reason: String },
    /// Tell someone about the prompt; no reply is expected.
    NotifyOnly { message: String },
    /// An action tag this build does not know. Executed as `RequireHuman`.
    #[serde(other)]
    Unrecognized,
}

impl Action {
    pub fn auto_reply(value: impl Into<String>) -> Self {
        Action::AutoReply {
            value: value.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Action::Deny {
            reason: reason.into(),
        }
    }

    pub fn notify_only(message: impl Into<String>) -> Self {
        Action::NotifyOnly {
            message: message.into(),
        }
    }

    /// Whether carrying out this action writes into the agent without a human.
    pub fn is_auto_execution(&self) -> bool {
        matches!(self, Action::AutoReply { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::AutoReply { .. } => "auto_reply",
            Action::RequireHuman => "require_human",
            Action::Deny { .. } => "deny",
            Action::NotifyOnly { .. } => "notify_only",
            Action::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::AutoReply { value } => write!(f, "auto_reply({value:?})"),
            Action::RequireHuman => f.write_str("require_human"),
            Action::Deny { reason } => write!(f, "deny({reason:?})"),
            Action::NotifyOnly { message } => write!(f, "notify_only({message:?})"),
            Action::Unrecognized => f.write_str("unrecognized"),
        }
    }
}

/// Actions allowed as policy defaults. Has no auto-reply variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SafeAction {
    #[default]
    RequireHuman,
    Deny { reason: String },
    NotifyOnly { message: String },
}

impl From<SafeAction> for Action {
    fn from(action: SafeAction) -> Self {
        match action {
            SafeAction::RequireHuman => Action::RequireHuman,
            SafeAction::Deny { reason } => Action::Deny { reason },
            SafeAction::NotifyOnly { message } => Action::NotifyOnly { message },
        }
    }
}

/// What carrying out an action actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionEffect {
    /// Text was written into the agent.
    Injected,
    /// Dry run: injection was described, not performed.
    DryRun,
    /// The prompt was handed to a human channel.
    Routed,
    /// A notice went out; nothing was injected.
    Notified,
    /// Nothing happened because the engine is stopped.
    Suppressed,
    /// The effect could not be carried out.
    Failed,
}

/// Outcome of executing one action. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub effect: ActionEffect,
    pub success: bool,
    pub detail: String,
}

impl ActionResult {
    pub fn ok(effect: ActionEffect, detail: impl Into<String>) -> Self {
        Self {
            effect,
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            effect: ActionEffect::Failed,
            success: false,
            detail: detail.into(),
        }
    }
}
