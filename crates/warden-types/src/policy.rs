//! Declarative governance policy: ordered rules plus safe defaults.
//!
//! Policies are loaded from TOML:
//!
//! ```toml
//! name = "ci"
//! autonomy = "full"
//! confidence_floor = "medium"
//!
//! [[rules]]
//! name = "confirm-tests"
//! match = { prompt_types = ["yes_no"], min_confidence = "high", tool = "claude*" }
//! action = { type = "auto_reply", value = "y" }
//!
//! [defaults]
//! no_match = { type = "require_human" }
//! low_confidence = { type = "notify_only", message = "low confidence prompt" }
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::action::{Action, SafeAction};
use crate::prompt::{Confidence, PromptType};
use crate::WardenError;

/// Whether policy-driven auto-execution is permitted at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    /// Every prompt goes to a human.
    #[default]
    Off,
    /// Auto-reply only for low-risk prompts.
    Assist,
    /// Auto-reply unless the prompt is critical risk.
    Full,
}

impl fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutonomyMode::Off => f.write_str("off"),
            AutonomyMode::Assist => f.write_str("assist"),
            AutonomyMode::Full => f.write_str("full"),
        }
    }
}

/// Autopilot engine mode. Persisted across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    #[default]
    Running,
    /// Every prompt is routed to a human; nothing is evaluated.
    Paused,
    /// Kill switch: nothing is tracked, routed, or injected.
    Stopped,
}

impl EngineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::Running => "running",
            EngineMode::Paused => "paused",
            EngineMode::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EngineMode {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(EngineMode::Running),
            "paused" => Ok(EngineMode::Paused),
            "stopped" => Ok(EngineMode::Stopped),
            other => Err(WardenError::ConfigError(format!(
                "invalid engine mode: {other:?} (expected running, paused, or stopped)"
            ))),
        }
    }
}

/// Match criteria for a rule. Absent criteria match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleMatch {
    /// Prompt types this rule applies to; empty means any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompt_types: Vec<PromptType>,
    /// Minimum detector confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<Confidence>,
    /// Tool id glob (`*` and `?` wildcards).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Regex searched in the prompt text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_pattern: Option<String>,
}

/// One ordered policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    #[serde(rename = "match", default)]
    pub criteria: RuleMatch,
    pub action: Action,
}

/// Fallback actions. Typed as [`SafeAction`] so they never auto-execute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyDefaults {
    #[serde(default)]
    pub no_match: SafeAction,
    #[serde(default)]
    pub low_confidence: SafeAction,
}

/// An ordered rule list plus defaults. First matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    #[serde(default)]
    pub autonomy: AutonomyMode,
    /// A matched rule whose prompt confidence is below this floor is
    /// overridden by `defaults.low_confidence`.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: Confidence,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default)]
    pub defaults: PolicyDefaults,
}

fn default_confidence_floor() -> Confidence {
    Confidence::Medium
}

impl Policy {
    /// An empty policy: every prompt falls through to `require_human`.
    pub fn new(name: impl Into<String>, autonomy: AutonomyMode) -> Self {
        Self {
            name: name.into(),
            autonomy,
            confidence_floor: default_confidence_floor(),
            rules: Vec::new(),
            defaults: PolicyDefaults::default(),
        }
    }

    /// Append a rule (builder style).
    pub fn with_rule(mut self, name: impl Into<String>, criteria: RuleMatch, action: Action) -> Self {
        self.rules.push(PolicyRule {
            name: name.into(),
            criteria,
            action,
        });
        self
    }

    /// Parse a policy from a TOML string and validate it.
    pub fn from_toml(content: &str) -> Result<Self, WardenError> {
        let policy: Self =
            toml::from_str(content).map_err(|e| WardenError::PolicyError(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Check rule names and patterns.
    ///
    /// Command patterns must compile as regexes. Tool globs may only use
    /// `*` and `?` as wildcards, so they always compile; an empty rule name
    /// is rejected because explain output and traces refer to rules by name.
    pub fn validate(&self) -> Result<(), WardenError> {
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.name.trim().is_empty() {
                return Err(WardenError::PolicyError(format!(
                    "rule[{index}] has an empty name"
                )));
            }
            if let Some(pattern) = rule.criteria.command_pattern.as_deref() {
                regex::Regex::new(pattern).map_err(|e| {
                    WardenError::PolicyError(format!(
                        "rule '{}': invalid command pattern: {e}",
                        rule.name
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Serialize the policy to a TOML string.
    pub fn to_toml(&self) -> Result<String, WardenError> {
        toml::to_string_pretty(self).map_err(|e| WardenError::PolicyError(e.to_string()))
    }

    /// Load a policy file from disk.
    pub fn load(path: &Path) -> Result<Self, WardenError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WardenError::PolicyError(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }
}
