//! Deterministic risk scoring for prompts.
//!
//! Each signal is a named regex over the prompt text (or a check on the
//! prompt context) with a fixed weight. The score is the capped sum of
//! matching weights; the same context always yields the same assessment.

use regex::Regex;

use warden_types::{Confidence, PromptType, RiskAssessment, RiskCategory};

use crate::evaluator::PromptContext;

/// Weight of a signal that is critical on its own. Matching one of these is
/// enough for FULL autonomy to hand the prompt to a human.
const CRITICAL: u8 = 75;

/// Text signals: (name, pattern, weight).
const TEXT_SIGNALS: &[(&str, &str, u8)] = &[
    (
        "destructive_delete",
        r"(?i)\brm\s+-[a-z]*(rf|fr)[a-z]*\b|\brm\s+-[a-z]*r[a-z]*\s+-[a-z]*f",
        CRITICAL,
    ),
    (
        "database_drop",
        r"(?i)\b(drop|truncate)\s+(table|database|schema)\b",
        CRITICAL,
    ),
    ("force_push", r"(?i)\bgit\s+push\b.*(--force\b|\s-f\b)", CRITICAL),
    ("disk_format", r"(?i)\bmkfs(\.\w+)?\b|\bdd\s+if=", CRITICAL),
    ("privilege_escalation", r"(?i)\bsudo\b|\bchmod\s+(-R\s+)?777\b", 25),
    (
        "remote_execution",
        r"(?i)\b(curl|wget)\b[^|\n]*\|\s*(ba|z)?sh\b",
        CRITICAL,
    ),
    (
        "secret_access",
        r"(?i)\.env\b|credentials|id_rsa|\.pem\b|\bsecrets?\b",
        20,
    ),
    (
        "history_rewrite",
        r"(?i)\bgit\s+(reset\s+--hard|clean\s+-[a-z]*f)",
        25,
    ),
];

const PRODUCTION_WEIGHT: u8 = 25;
const FREE_TEXT_WEIGHT: u8 = 10;
const LOW_CONFIDENCE_WEIGHT: u8 = 10;

/// Pure risk classifier. Construct once and share.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    signals: Vec<(&'static str, Regex, u8)>,
}

impl RiskClassifier {
    pub fn new() -> Self {
        let mut signals = Vec::with_capacity(TEXT_SIGNALS.len());
        for (name, pattern, weight) in TEXT_SIGNALS {
            match Regex::new(pattern) {
                Ok(re) => signals.push((*name, re, *weight)),
                Err(e) => tracing::error!(signal = name, error = %e, "invalid risk signal pattern"),
            }
        }
        Self { signals }
    }

    /// Score a prompt context.
    pub fn classify(&self, ctx: &PromptContext) -> RiskAssessment {
        let mut score: u32 = 0;
        let mut names: Vec<String> = Vec::new();

        for (name, re, weight) in &self.signals {
            if re.is_match(&ctx.prompt_text) {
                score += u32::from(*weight);
                names.push((*name).to_string());
            }
        }

        let env = ctx.environment.to_ascii_lowercase();
        if env == "prod" || env == "production" {
            score += u32::from(PRODUCTION_WEIGHT);
            names.push("production_environment".into());
        }
        if ctx.prompt_type == PromptType::FreeText {
            score += u32::from(FREE_TEXT_WEIGHT);
            names.push("free_text_prompt".into());
        }
        if ctx.confidence == Confidence::Low {
            score += u32::from(LOW_CONFIDENCE_WEIGHT);
            names.push("low_confidence".into());
        }

        names.sort();
        let score = score.min(100) as u8;
        RiskAssessment {
            score,
            category: RiskCategory::from_score(score),
            signals: names,
        }
    }
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new()
    }
}
