//! Pure admission checks for inbound human messages.
//!
//! The gate sees a snapshot of the session, its active prompt, and the
//! verdicts of the identity, rate, and policy checks, and decides whether
//! the message may proceed. It never touches state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use warden_types::{AgentActivity, PromptEvent, PromptState, Session};

/// What an inbound message is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    /// An answer to the active prompt.
    Reply,
    /// Free-form input while the agent is idle.
    ChatTurn,
    /// Stop the current agent turn.
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptKind {
    Reply,
    ChatTurn,
    Interrupt,
}

impl AcceptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptKind::Reply => "reply",
            AcceptKind::ChatTurn => "chat_turn",
            AcceptKind::Interrupt => "interrupt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    BusyStreaming,
    BusyRunning,
    NoActiveSession,
    NotAwaitingInput,
    TtlExpired,
    PolicyDeny,
    IdentityNotAllowlisted,
    InvalidChoice,
    RateLimited,
    UnsafeInputType,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::BusyStreaming => "busy_streaming",
            RejectCode::BusyRunning => "busy_running",
            RejectCode::NoActiveSession => "no_active_session",
            RejectCode::NotAwaitingInput => "not_awaiting_input",
            RejectCode::TtlExpired => "ttl_expired",
            RejectCode::PolicyDeny => "policy_deny",
            RejectCode::IdentityNotAllowlisted => "identity_not_allowlisted",
            RejectCode::InvalidChoice => "invalid_choice",
            RejectCode::RateLimited => "rate_limited",
            RejectCode::UnsafeInputType => "unsafe_input_type",
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "verdict", content = "code")]
pub enum GateVerdict {
    Accept(AcceptKind),
    Reject(RejectCode),
}

impl GateVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, GateVerdict::Accept(_))
    }
}

/// Everything the gate looks at.
#[derive(Debug, Clone)]
pub struct GateInput<'a> {
    pub kind: InboundKind,
    pub session: Option<&'a Session>,
    /// The session's active prompt, if any.
    pub prompt: Option<&'a PromptEvent>,
    pub prompt_state: Option<PromptState>,
    pub value: &'a str,
    pub now: DateTime<Utc>,
    pub identity_allowed: bool,
    pub rate_limited: bool,
    pub policy_denied: bool,
}

pub struct Gate;

impl Gate {
    pub fn evaluate(input: &GateInput<'_>) -> GateVerdict {
        match Self::check(input) {
            Ok(kind) => GateVerdict::Accept(kind),
            Err(code) => GateVerdict::Reject(code),
        }
    }

    fn check(input: &GateInput<'_>) -> Result<AcceptKind, RejectCode> {
        let session = input
            .session
            .filter(|s| !s.status.is_terminal())
            .ok_or(RejectCode::NoActiveSession)?;
        if !input.identity_allowed {
            return Err(RejectCode::IdentityNotAllowlisted);
        }
        if input.rate_limited {
            return Err(RejectCode::RateLimited);
        }
        if input.policy_denied {
            return Err(RejectCode::PolicyDeny);
        }

        match input.kind {
            InboundKind::Interrupt => Ok(AcceptKind::Interrupt),
            InboundKind::Reply => {
                let prompt = input.prompt.ok_or(RejectCode::NotAwaitingInput)?;
                if input.prompt_state != Some(PromptState::AwaitingReply) {
                    return Err(RejectCode::NotAwaitingInput);
                }
                if prompt.is_expired_at(input.now) {
                    return Err(RejectCode::TtlExpired);
                }
                if has_unsafe_chars(input.value) {
                    return Err(RejectCode::UnsafeInputType);
                }
                if !prompt.accepts_value(input.value) {
                    return Err(RejectCode::InvalidChoice);
                }
                Ok(AcceptKind::Reply)
            }
            InboundKind::ChatTurn => {
                match session.activity {
                    AgentActivity::Streaming => return Err(RejectCode::BusyStreaming),
                    AgentActivity::Running => return Err(RejectCode::BusyRunning),
                    AgentActivity::Idle => {}
                }
                if input.prompt.is_some() {
                    // A pending prompt must be answered as a reply.
                    return Err(RejectCode::NotAwaitingInput);
                }
                if has_unsafe_chars(input.value) {
                    return Err(RejectCode::UnsafeInputType);
                }
                Ok(AcceptKind::ChatTurn)
            }
        }
    }
}

/// Control characters other than tab, newline, and carriage return. ESC is
/// the one that matters: it starts terminal escape sequences.
fn has_unsafe_chars(value: &str) -> bool {
    value
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
}
