//! Supervised agent sessions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::PromptId;

/// Lifecycle status of one supervised agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    AwaitingReply,
    Completed,
    Crashed,
    Canceled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Crashed | SessionStatus::Canceled
        )
    }

    /// Whether `self -> next` is a permitted status change.
    ///
    /// Re-entering the current non-terminal status is allowed so callers
    /// can idempotently reassert it.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        match (self, next) {
            (Starting, Running | AwaitingReply | Completed | Crashed | Canceled) => true,
            (Running, AwaitingReply | Completed | Crashed | Canceled) => true,
            (AwaitingReply, Running | Completed | Crashed | Canceled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::AwaitingReply => "awaiting_reply",
            SessionStatus::Completed => "completed",
            SessionStatus::Crashed => "crashed",
            SessionStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the agent process is doing right now, as reported by supervision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentActivity {
    #[default]
    Idle,
    /// Producing output.
    Streaming,
    /// Executing a tool or command without output.
    Running,
}

/// One supervised agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub tool: String,
    pub command: String,
    pub cwd: String,
    pub pid: Option<u32>,
    /// Human tag used by policy `session_tag` matching.
    #[serde(default)]
    pub label: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub activity: AgentActivity,
    pub active_prompt_id: Option<PromptId>,
    pub prompt_count: u64,
    /// Channel identities (`channel:user`) permitted to answer this session.
    #[serde(default)]
    pub allowed_identities: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Parameters for registering a new session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub tool: String,
    pub command: String,
    pub cwd: String,
    pub pid: Option<u32>,
    pub label: String,
    pub allowed_identities: Vec<String>,
}

impl NewSession {
    pub fn new(tool: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn allow_identity(mut self, identity: impl Into<String>) -> Self {
        self.allowed_identities.push(identity.into());
        self
    }
}
