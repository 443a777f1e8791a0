//! Built-in policy templates.
//!
//! These provide starting points for `warden policy check --builtin`: a
//! fully supervised policy, a conservative assist policy, and a CI
//! autopilot that answers routine confirmations on its own.

use warden_types::{Policy, WardenError};

/// Supervised: autonomy off, every prompt goes to a human.
pub const SUPERVISED: &str = r#"
name = "supervised"
autonomy = "off"

[defaults]
no_match = { type = "require_human" }
low_confidence = { type = "require_human" }
"#;

/// Assist: auto-confirm high-confidence yes/no and enter prompts, but
/// only when the classifier rates them low risk.
pub const ASSIST_SAFE: &str = r#"
name = "assist-safe"
autonomy = "assist"
confidence_floor = "medium"

[[rules]]
name = "deny-force-push"
match = { command_pattern = '(?i)git\s+push\b.*--force' }
action = { type = "deny", reason = "force push requires a human at the keyboard" }

[[rules]]
name = "confirm-yes-no"
match = { prompt_types = ["yes_no"], min_confidence = "high" }
action = { type = "auto_reply", value = "y" }

[[rules]]
name = "press-enter"
match = { prompt_types = ["confirm_enter"], min_confidence = "high" }
action = { type = "auto_reply", value = "" }

[defaults]
no_match = { type = "require_human" }
low_confidence = { type = "require_human" }
"#;

/// CI autopilot: full autonomy outside production, production prompts
/// are surfaced to a human.
pub const CI_AUTOPILOT: &str = r#"
name = "ci-autopilot"
autonomy = "full"
confidence_floor = "medium"

[[rules]]
name = "production-needs-human"
match = { environment = "production" }
action = { type = "require_human" }

[[rules]]
name = "confirm-yes-no"
match = { prompt_types = ["yes_no"] }
action = { type = "auto_reply", value = "y" }

[[rules]]
name = "press-enter"
match = { prompt_types = ["confirm_enter"] }
action = { type = "auto_reply", value = "" }

[[rules]]
name = "free-text-notify"
match = { prompt_types = ["free_text"] }
action = { type = "notify_only", message = "agent asked a free-text question" }

[defaults]
no_match = { type = "require_human" }
low_confidence = { type = "notify_only", message = "low confidence prompt" }
"#;

/// Look up a built-in policy template by name.
pub fn get_builtin_policy(name: &str) -> Option<&'static str> {
    match name {
        "supervised" => Some(SUPERVISED),
        "assist-safe" => Some(ASSIST_SAFE),
        "ci-autopilot" => Some(CI_AUTOPILOT),
        _ => None,
    }
}

/// List all available builtin policy template names.
pub fn list_builtin_policies() -> &'static [&'static str] {
    &["supervised", "assist-safe", "ci-autopilot"]
}

/// Parse a builtin template into a [`Policy`].
pub fn builtin_policy(name: &str) -> Result<Policy, WardenError> {
    let text = get_builtin_policy(name)
        .ok_or_else(|| WardenError::PolicyError(format!("unknown builtin policy: {name}")))?;
    Policy::from_toml(text)
}
