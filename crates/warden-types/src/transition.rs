//! Prompt lifecycle transition records and the listener seam.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::PromptId;
use crate::prompt::PromptState;

/// One state change of a prompt lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub prompt_id: PromptId,
    pub session_id: Uuid,
    pub from: PromptState,
    pub to: PromptState,
    pub at: DateTime<Utc>,
    /// Set when expiry was forced by the TTL sweep rather than taken as a
    /// table edge.
    #[serde(default)]
    pub forced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Observer notified synchronously on every prompt transition.
///
/// Called after the state has changed and before any side effect that
/// follows from it. Implementations must not panic and must not block for
/// long; failures are theirs to log.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, transition: &Transition);
}
