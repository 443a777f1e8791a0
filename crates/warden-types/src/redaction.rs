//! Pattern-based secret redaction for prompt excerpts.
//!
//! The [`Redactor`] is constructed once at startup and passed by reference
//! to whatever builds [`PromptEvent`](crate::PromptEvent)s. Built-in
//! patterns cover API keys, bearer tokens, password assignments, and email
//! addresses; custom patterns come from configuration.

use regex::Regex;

use crate::config::RedactionConfig;
use crate::WardenError;

/// A compiled redaction rule.
#[derive(Debug, Clone)]
struct RedactionRule {
    pattern: Regex,
    replacement: String,
}

/// Secret redactor applied to prompt text before it leaves the process.
#[derive(Debug, Clone)]
pub struct Redactor {
    rules: Vec<RedactionRule>,
    enabled: bool,
}

/// Built-in patterns, applied in order.
const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    // Provider API keys: sk-..., sk-ant-..., ghp_..., xoxb-/xoxp-...
    (r"\bsk-[A-Za-z0-9_-]{16,}", "[API_KEY]"),
    (r"\bgh[pousr]_[A-Za-z0-9]{20,}", "[API_KEY]"),
    (r"\bxox[abps]-[A-Za-z0-9-]{10,}", "[API_KEY]"),
    (r"\bAKIA[0-9A-Z]{16}\b", "[AWS_KEY]"),
    // Authorization: Bearer <token>
    (r"(?i)bearer\s+[A-Za-z0-9._~+/=-]{8,}", "Bearer [TOKEN]"),
    // password=..., secret: ..., token=...
    (
        r"(?i)\b(password|passwd|secret|token)\s*[:=]\s*\S+",
        "$1=[REDACTED]",
    ),
    (r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}", "[EMAIL]"),
];

impl Redactor {
    /// Create a redactor with the built-in patterns.
    ///
    /// If `enabled` is false, `redact()` returns the input unchanged.
    pub fn new(enabled: bool) -> Self {
        let mut rules = Vec::new();
        if enabled {
            for (pattern, replacement) in BUILTIN_PATTERNS {
                if let Ok(re) = Regex::new(pattern) {
                    rules.push(RedactionRule {
                        pattern: re,
                        replacement: (*replacement).to_string(),
                    });
                }
            }
        }
        Self { rules, enabled }
    }

    /// A pass-through redactor.
    pub fn disabled() -> Self {
        Self::new(false)
    }

    /// Add a custom redaction pattern.
    pub fn add_pattern(&mut self, pattern: &str, replacement: &str) -> Result<(), WardenError> {
        let re = Regex::new(pattern)
            .map_err(|e| WardenError::ConfigError(format!("invalid redaction pattern: {e}")))?;
        self.rules.push(RedactionRule {
            pattern: re,
            replacement: replacement.to_string(),
        });
        Ok(())
    }

    /// Build a [`Redactor`] from configuration.
    pub fn from_config(config: &RedactionConfig) -> Result<Self, WardenError> {
        let mut redactor = Self::new(config.enabled);
        for custom in &config.custom_patterns {
            redactor.add_pattern(&custom.pattern, &custom.replacement)?;
        }
        Ok(redactor)
    }

    /// Apply all redaction rules to the input text.
    pub fn redact(&self, input: &str) -> String {
        if !self.enabled || self.rules.is_empty() {
            return input.to_string();
        }

        let mut result = input.to_string();
        for rule in &self.rules {
            result = rule
                .pattern
                .replace_all(&result, rule.replacement.as_str())
                .into_owned();
        }
        result
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedactionPattern;

    #[test]
    fn disabled_redactor_passes_through() {
        let redactor = Redactor::disabled();
        let input = "token=abc123 user@example.com";
        assert_eq!(redactor.redact(input), input);
    }

    #[test]
    fn masks_api_keys_and_tokens() {
        let redactor = Redactor::new(true);
        let out = redactor.redact(
            "Use sk-ant-REDACTED and ghp_abcdefghijklmnopqrstuvwx1234?",
        );
        assert!(!out.contains("sk-ant-REDACTED"));
        assert!(!out.contains("ghp_abcdefghijklmnopqrstuvwx1234"));
        assert!(out.contains("[API_KEY]"));
    }

    #[test]
    fn masks_password_assignment_keeping_the_key() {
        let redactor = Redactor::new(true);
        assert_eq!(
            redactor.redact("run with password=hunter2 ?"),
            "run with password=[REDACTED] ?"
        );
    }

    #[test]
    fn masks_bearer_and_email() {
        let redactor = Redactor::new(true);
        let out = redactor.redact("curl -H 'Authorization: Bearer abcdefgh12345' to ops@example.com");
        assert!(out.contains("Bearer [TOKEN]"));
        assert!(out.contains("[EMAIL]"));
    }

    #[test]
    fn custom_patterns_from_config() {
        let config = RedactionConfig {
            enabled: true,
            custom_patterns: vec![RedactionPattern {
                pattern: r"ACME-\d{4}".into(),
                replacement: "[TICKET]".into(),
            }],
        };
        let redactor = Redactor::from_config(&config).unwrap();
        assert_eq!(redactor.redact("fix ACME-1234 now?"), "fix [TICKET] now?");
    }

    #[test]
    fn invalid_custom_pattern_is_config_error() {
        let mut redactor = Redactor::new(true);
        let err = redactor.add_pattern("(unclosed", "x").unwrap_err();
        assert!(matches!(err, WardenError::ConfigError(_)));
    }
}
