//! The outcome of policy evaluation.
//!
//! A [`Decision`] holds no clock readings or random ids: given the same
//! policy and the same prompt context it serializes to identical bytes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::policy::AutonomyMode;

/// Which rule produced the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRule {
    pub index: usize,
    pub name: String,
}

/// Why the decision resolved to its action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// A rule matched and its action stands.
    RuleMatch,
    /// No rule matched; `defaults.no_match` applied.
    NoMatchDefault,
    /// A rule matched but confidence was under the floor.
    LowConfidenceDefault,
    /// Policy autonomy is `off`.
    AutonomyOff,
    /// The autopilot engine is paused.
    EnginePaused,
    /// An auto-reply was withheld because the prompt is critical risk.
    RiskEscalation,
    /// Assist autonomy only auto-replies to low-risk prompts.
    AssistRequiresHuman,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionReason::RuleMatch => "rule_match",
            DecisionReason::NoMatchDefault => "no_match_default",
            DecisionReason::LowConfidenceDefault => "low_confidence_default",
            DecisionReason::AutonomyOff => "autonomy_off",
            DecisionReason::EnginePaused => "engine_paused",
            DecisionReason::RiskEscalation => "risk_escalation",
            DecisionReason::AssistRequiresHuman => "assist_requires_human",
        };
        f.write_str(s)
    }
}

/// Coarse risk bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskCategory {
    /// Bucket a 0..=100 score.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=24 => RiskCategory::Low,
            25..=49 => RiskCategory::Medium,
            50..=74 => RiskCategory::High,
            _ => RiskCategory::Critical,
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskCategory::Low => f.write_str("low"),
            RiskCategory::Medium => f.write_str("medium"),
            RiskCategory::High => f.write_str("high"),
            RiskCategory::Critical => f.write_str("critical"),
        }
    }
}

/// Deterministic risk score for a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0..=100.
    pub score: u8,
    pub category: RiskCategory,
    /// Names of the signals that contributed, sorted.
    pub signals: Vec<String>,
}

impl RiskAssessment {
    pub fn none() -> Self {
        Self {
            score: 0,
            category: RiskCategory::Low,
            signals: Vec::new(),
        }
    }
}

/// A reproducible governance decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub matched_rule: Option<MatchedRule>,
    pub action: Action,
    pub reason: DecisionReason,
    /// SHA-256 of the canonical policy encoding.
    pub policy_hash: String,
    pub autonomy: AutonomyMode,
    /// SHA-256 of the canonical (policy hash, prompt context) tuple.
    pub idempotency_key: String,
    pub risk: RiskAssessment,
}

impl Decision {
    pub fn requires_human(&self) -> bool {
        matches!(self.action, Action::RequireHuman | Action::Unrecognized)
    }
}
