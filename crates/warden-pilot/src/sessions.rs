//! In-memory registry of supervised sessions.
//!
//! Terminal sessions are kept for audit queries until
//! [`SessionRegistry::prune_terminal`] drops them.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use warden_types::{AgentActivity, NewSession, PromptId, Session, SessionStatus, WardenError};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<Uuid, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session in STARTING and return its id.
    pub fn register(&mut self, new: NewSession) -> Uuid {
        let session_id = Uuid::new_v4();
        let session = Session {
            session_id,
            tool: new.tool,
            command: new.command,
            cwd: new.cwd,
            pid: new.pid,
            label: new.label,
            status: SessionStatus::Starting,
            activity: AgentActivity::Idle,
            active_prompt_id: None,
            prompt_count: 0,
            allowed_identities: new.allowed_identities,
            created_at: Utc::now(),
            ended_at: None,
        };
        info!(session_id = %session_id, tool = %session.tool, "session registered");
        self.sessions.insert(session_id, session);
        session_id
    }

    pub fn get(&self, session_id: &Uuid) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &Uuid) -> Option<&mut Session> {
        self.sessions.get_mut(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions that have not reached a terminal status.
    pub fn live(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values().filter(|s| !s.status.is_terminal())
    }

    /// Move a session to `status`, following the status table.
    pub fn set_status(&mut self, session_id: Uuid, status: SessionStatus) -> Result<(), WardenError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(WardenError::UnknownSession(session_id))?;
        if !session.status.can_transition_to(status) {
            return Err(WardenError::InvalidSessionTransition {
                session_id,
                from: session.status,
                to: status,
            });
        }
        if session.status != status {
            debug!(session_id = %session_id, from = %session.status, to = %status, "session status");
        }
        session.status = status;
        if status.is_terminal() {
            session.ended_at = Some(Utc::now());
            session.active_prompt_id = None;
        }
        Ok(())
    }

    pub fn set_activity(&mut self, session_id: Uuid, activity: AgentActivity) -> Result<(), WardenError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(WardenError::UnknownSession(session_id))?;
        session.activity = activity;
        Ok(())
    }

    /// Point the session at its new active prompt. Returns the prompt it
    /// replaced, if any.
    pub(crate) fn activate_prompt(
        &mut self,
        session_id: Uuid,
        prompt_id: PromptId,
    ) -> Result<Option<PromptId>, WardenError> {
        self.set_status(session_id, SessionStatus::AwaitingReply)?;
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(WardenError::UnknownSession(session_id))?;
        Ok(session.active_prompt_id.replace(prompt_id))
    }

    /// Clear the active prompt if it is `prompt_id`, returning the session
    /// to RUNNING.
    pub(crate) fn release_prompt(&mut self, session_id: Uuid, prompt_id: &PromptId) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        if session.active_prompt_id.as_ref() != Some(prompt_id) {
            return;
        }
        session.active_prompt_id = None;
        if session.status == SessionStatus::AwaitingReply {
            session.status = SessionStatus::Running;
        }
    }

    /// Drop terminal sessions that ended more than `retention` before `now`.
    pub fn prune_terminal(&mut self, retention: Duration, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| match (s.status.is_terminal(), s.ended_at) {
            (true, Some(ended)) => now - ended < retention,
            _ => true,
        });
        before - self.sessions.len()
    }
}
