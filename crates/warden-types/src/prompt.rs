//! Prompt events, replies, and the prompt lifecycle states.
//!
//! A [`PromptEvent`] is produced once by the detection boundary and never
//! mutated afterwards. A [`Reply`] arrives from a human channel and is
//! consumed exactly once by the router.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::canonical_hash;
use crate::ids::PromptId;
use crate::redaction::Redactor;

/// Maximum number of characters kept in a prompt excerpt.
pub const MAX_EXCERPT_CHARS: usize = 200;

/// Default time-to-live for an unanswered prompt.
pub const DEFAULT_TTL_SECONDS: u64 = 300;

/// The interaction class of a detected prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    /// `Proceed? (y/n)`
    YesNo,
    /// `Press Enter to continue`
    ConfirmEnter,
    /// A numbered or labelled menu.
    MultipleChoice,
    /// An open text request.
    FreeText,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::YesNo => "yes_no",
            PromptType::ConfirmEnter => "confirm_enter",
            PromptType::MultipleChoice => "multiple_choice",
            PromptType::FreeText => "free_text",
        }
    }
}

impl fmt::Display for PromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How sure the detector is that the text is a real prompt.
///
/// Ordered: `Low < Medium < High`, so policy floors compare with `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Low => f.write_str("low"),
            Confidence::Medium => f.write_str("medium"),
            Confidence::High => f.write_str("high"),
        }
    }
}

/// Lifecycle state of a single prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptState {
    Created,
    Routed,
    AwaitingReply,
    ReplyReceived,
    Injected,
    Resolved,
    Expired,
    Canceled,
    Failed,
}

impl PromptState {
    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PromptState::Resolved | PromptState::Expired | PromptState::Canceled | PromptState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptState::Created => "created",
            PromptState::Routed => "routed",
            PromptState::AwaitingReply => "awaiting_reply",
            PromptState::ReplyReceived => "reply_received",
            PromptState::Injected => "injected",
            PromptState::Resolved => "resolved",
            PromptState::Expired => "expired",
            PromptState::Canceled => "canceled",
            PromptState::Failed => "failed",
        }
    }

    /// Every state, in lifecycle order.
    pub const ALL: [PromptState; 9] = [
        PromptState::Created,
        PromptState::Routed,
        PromptState::AwaitingReply,
        PromptState::ReplyReceived,
        PromptState::Injected,
        PromptState::Resolved,
        PromptState::Expired,
        PromptState::Canceled,
        PromptState::Failed,
    ];
}

impl fmt::Display for PromptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input constraints for free-text prompts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConstraints {
    /// Maximum reply length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Whether an empty reply is acceptable.
    #[serde(default)]
    pub allow_empty: bool,
}

/// An immutable fact: the agent asked something.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptEvent {
    pub prompt_id: PromptId,
    pub session_id: Uuid,
    pub prompt_type: PromptType,
    pub confidence: Confidence,
    /// Redacted display text, at most [`MAX_EXCERPT_CHARS`] characters.
    pub excerpt: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub constraints: PromptConstraints,
    pub idempotency_key: String,
    pub ttl_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub tool: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub session_label: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub environment: String,
}

impl PromptEvent {
    /// Start building a prompt event for the given session.
    pub fn builder(
        session_id: Uuid,
        prompt_type: PromptType,
        text: impl Into<String>,
    ) -> PromptEventBuilder {
        PromptEventBuilder {
            session_id,
            prompt_type,
            text: text.into(),
            prompt_id: None,
            confidence: Confidence::Medium,
            choices: Vec::new(),
            constraints: PromptConstraints::default(),
            ttl_seconds: DEFAULT_TTL_SECONDS,
            created_at: None,
            tool: String::new(),
            cwd: String::new(),
            session_label: String::new(),
            repo: String::new(),
            environment: String::new(),
        }
    }

    /// When the prompt becomes eligible for forced expiry.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        self.created_at + chrono::Duration::seconds(ttl.min(i64::from(i32::MAX)))
    }

    /// Whether the TTL has elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Whether `value` is an acceptable answer for this prompt's type,
    /// choices, and constraints.
    pub fn accepts_value(&self, value: &str) -> bool {
        let trimmed = value.trim();
        match self.prompt_type {
            PromptType::YesNo => matches!(
                trimmed.to_ascii_lowercase().as_str(),
                "y" | "n" | "yes" | "no"
            ),
            PromptType::ConfirmEnter => true,
            PromptType::MultipleChoice => {
                if self.choices.is_empty() {
                    return !trimmed.is_empty();
                }
                if let Ok(index) = trimmed.parse::<usize>() {
                    return index >= 1 && index <= self.choices.len();
                }
                self.choices.iter().any(|c| c.eq_ignore_ascii_case(trimmed))
            }
            PromptType::FreeText => {
                if trimmed.is_empty() && !self.constraints.allow_empty {
                    return false;
                }
                match self.constraints.max_length {
                    Some(max) => value.chars().count() <= max,
                    None => true,
                }
            }
        }
    }
}

/// Builder for [`PromptEvent`]; redaction and truncation happen in `build`.
#[derive(Debug, Clone)]
pub struct PromptEventBuilder {
    session_id: Uuid,
    prompt_type: PromptType,
    text: String,
    prompt_id: Option<PromptId>,
    confidence: Confidence,
    choices: Vec<String>,
    constraints: PromptConstraints,
    ttl_seconds: u64,
    created_at: Option<DateTime<Utc>>,
    tool: String,
    cwd: String,
    session_label: String,
    repo: String,
    environment: String,
}

impl PromptEventBuilder {
    pub fn prompt_id(mut self, id: impl Into<PromptId>) -> Self {
        self.prompt_id = Some(id.into());
        self
    }

    pub fn confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    pub fn constraints(mut self, constraints: PromptConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn ttl_seconds(mut self, ttl: u64) -> Self {
        self.ttl_seconds = ttl;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn session_label(mut self, label: impl Into<String>) -> Self {
        self.session_label = label.into();
        self
    }

    pub fn repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = repo.into();
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Redact and truncate the excerpt, derive the idempotency key, and
    /// freeze the event.
    pub fn build(self, redactor: &Redactor) -> PromptEvent {
        let excerpt = truncate_chars(&redactor.redact(&self.text), MAX_EXCERPT_CHARS);
        let idempotency_key = canonical_hash(&serde_json::json!({
            "session_id": self.session_id,
            "prompt_type": self.prompt_type,
            "excerpt": excerpt,
            "choices": self.choices,
        }))
        .unwrap_or_else(|_| crate::canonical::sha256_hex(excerpt.as_bytes()));

        PromptEvent {
            prompt_id: self.prompt_id.unwrap_or_else(PromptId::generate),
            session_id: self.session_id,
            prompt_type: self.prompt_type,
            confidence: self.confidence,
            excerpt,
            choices: self.choices,
            constraints: self.constraints,
            idempotency_key,
            ttl_seconds: self.ttl_seconds,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            tool: self.tool,
            cwd: self.cwd,
            session_label: self.session_label,
            repo: self.repo,
            environment: self.environment,
        }
    }
}

/// Truncate to at most `max` characters, marking the cut with an ellipsis.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// How the injected reply is terminated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewlinePolicy {
    /// Append Enter unless the value already ends with a line terminator.
    #[default]
    Auto,
    /// Always append Enter.
    Always,
    /// Inject the value verbatim.
    Never,
}

/// A response from a human channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub prompt_id: PromptId,
    pub session_id: Uuid,
    pub value: String,
    /// One-time token; a second reply with the same nonce is rejected.
    pub nonce: String,
    /// `channel:user`, checked against the session allow-list.
    pub channel_identity: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub newline_policy: NewlinePolicy,
}

impl Reply {
    pub fn new(
        prompt_id: impl Into<PromptId>,
        session_id: Uuid,
        value: impl Into<String>,
        nonce: impl Into<String>,
        channel_identity: impl Into<String>,
    ) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            session_id,
            value: value.into(),
            nonce: nonce.into(),
            channel_identity: channel_identity.into(),
            received_at: Utc::now(),
            newline_policy: NewlinePolicy::Auto,
        }
    }

    pub fn with_newline_policy(mut self, policy: NewlinePolicy) -> Self {
        self.newline_policy = policy;
        self
    }

    /// The exact text to write into the agent's input stream.
    pub fn injection_text(&self) -> String {
        render_injection(&self.value, self.newline_policy)
    }
}

/// Apply a newline policy to a value. Enter is a carriage return on a PTY.
pub fn render_injection(value: &str, policy: NewlinePolicy) -> String {
    match policy {
        NewlinePolicy::Never => value.to_string(),
        NewlinePolicy::Always => format!("{value}\r"),
        NewlinePolicy::Auto => {
            if value.ends_with('\r') || value.ends_with('\n') {
                value.to_string()
            } else {
                format!("{value}\r")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(prompt_type: PromptType) -> PromptEventBuilder {
        PromptEvent::builder(Uuid::new_v4(), prompt_type, "Proceed?")
    }

    #[test]
    fn excerpt_is_truncated_to_limit() {
        let long = "x".repeat(500);
        let ev = PromptEvent::builder(Uuid::new_v4(), PromptType::FreeText, long)
            .build(&Redactor::disabled());
        assert_eq!(ev.excerpt.chars().count(), MAX_EXCERPT_CHARS);
        assert!(ev.excerpt.ends_with('…'));
    }

    #[test]
    fn excerpt_is_redacted() {
        let ev = PromptEvent::builder(
            Uuid::new_v4(),
            PromptType::YesNo,
            "export OPENAI_API_KEY=sk-abcdefghijklmnopqrstuvwxyz123456 ?",
        )
        .build(&Redactor::new(true));
        assert!(!ev.excerpt.contains("sk-abcdefghijklmnopqrstuvwxyz123456"));
    }

    #[test]
    fn idempotency_key_is_stable_for_same_content() {
        let session = Uuid::new_v4();
        let redactor = Redactor::disabled();
        let a = PromptEvent::builder(session, PromptType::YesNo, "Proceed?").build(&redactor);
        let b = PromptEvent::builder(session, PromptType::YesNo, "Proceed?").build(&redactor);
        assert_ne!(a.prompt_id, b.prompt_id);
        assert_eq!(a.idempotency_key, b.idempotency_key);
    }

    #[test]
    fn default_ttl_is_five_minutes() {
        let ev = event(PromptType::YesNo).build(&Redactor::disabled());
        assert_eq!(ev.ttl_seconds, 300);
        assert!(!ev.is_expired_at(ev.created_at + chrono::Duration::seconds(299)));
        assert!(ev.is_expired_at(ev.created_at + chrono::Duration::seconds(300)));
    }

    #[test]
    fn yes_no_accepts_only_yes_or_no() {
        let ev = event(PromptType::YesNo).build(&Redactor::disabled());
        assert!(ev.accepts_value("y"));
        assert!(ev.accepts_value("No"));
        assert!(!ev.accepts_value("maybe"));
    }

    #[test]
    fn multiple_choice_accepts_label_or_index() {
        let ev = event(PromptType::MultipleChoice)
            .choices(["apply", "skip", "abort"])
            .build(&Redactor::disabled());
        assert!(ev.accepts_value("2"));
        assert!(ev.accepts_value("ABORT"));
        assert!(!ev.accepts_value("4"));
        assert!(!ev.accepts_value("0"));
        assert!(!ev.accepts_value("retry"));
    }

    #[test]
    fn free_text_respects_constraints() {
        let ev = event(PromptType::FreeText)
            .constraints(PromptConstraints {
                max_length: Some(5),
                allow_empty: false,
            })
            .build(&Redactor::disabled());
        assert!(ev.accepts_value("hello"));
        assert!(!ev.accepts_value("hello!"));
        assert!(!ev.accepts_value("  "));
    }

    #[test]
    fn newline_policy_rendering() {
        assert_eq!(render_injection("y", NewlinePolicy::Auto), "y\r");
        assert_eq!(render_injection("y\n", NewlinePolicy::Auto), "y\n");
        assert_eq!(render_injection("y", NewlinePolicy::Never), "y");
        assert_eq!(render_injection("y\r", NewlinePolicy::Always), "y\r\r");
    }

    #[test]
    fn terminal_states() {
        let terminal: Vec<_> = PromptState::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal.len(), 4);
    }
}
