//! Error types shared across all Warden crates.

use uuid::Uuid;

use crate::ids::PromptId;
use crate::prompt::PromptState;
use crate::session::SessionStatus;

/// Errors that can occur across the governance pipeline.
///
/// Each variant corresponds to a different failure class: state machine
/// misuse, stale replies, policy loading, persistence, action execution,
/// configuration, or a collaborator port.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    #[error("invalid transition for prompt {prompt_id}: {from} -> {to}")]
    InvalidTransition {
        prompt_id: PromptId,
        from: PromptState,
        to: PromptState,
    },

    #[error("invalid status change for session {session_id}: {from} -> {to}")]
    InvalidSessionTransition {
        session_id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("unknown session {0}")]
    UnknownSession(Uuid),

    #[error("unknown or stale prompt {prompt_id}: {reason}")]
    UnknownOrStalePrompt { prompt_id: PromptId, reason: String },

    #[error("policy error: {0}")]
    PolicyError(String),

    #[error("persistence failure: {0}")]
    PersistenceError(String),

    #[error("action execution failed: {0}")]
    ActionError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("port error: {0}")]
    PortError(String),
}
