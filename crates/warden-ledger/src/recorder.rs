//! Best-effort audit recording for the live pipeline.
//!
//! [`AuditRecorder`] owns the single writer handle to the [`AuditChain`].
//! A failed append is retried once and then logged at error level; it is
//! never surfaced to the caller, so a storage problem cannot block a
//! governance decision.

use std::sync::Mutex;

use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use warden_types::{PromptId, Transition, TransitionListener, WardenError};

use crate::chain::AuditChain;
use crate::event::{AuditEvent, EVENT_PROMPT_TRANSITION};
use crate::integrity::{VerificationReport, VerifyScope};

pub struct AuditRecorder {
    chain: Mutex<AuditChain>,
}

impl AuditRecorder {
    pub fn new(chain: AuditChain) -> Self {
        Self {
            chain: Mutex::new(chain),
        }
    }

    /// Append an event, retrying once. Returns the event when stored.
    pub fn record<T: Serialize + ?Sized>(
        &self,
        event_type: &str,
        session_id: Option<Uuid>,
        prompt_id: Option<&PromptId>,
        payload: &T,
    ) -> Option<AuditEvent> {
        let mut chain = match self.chain.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("audit chain lock poisoned, continuing with inner value");
                poisoned.into_inner()
            }
        };

        match chain.append(event_type, session_id, prompt_id, payload) {
            Ok(event) => Some(event),
            Err(first) => {
                warn!(event_type, error = %first, "audit append failed, retrying once");
                match chain.append(event_type, session_id, prompt_id, payload) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        error!(
                            event_type,
                            session_id = ?session_id,
                            prompt_id = ?prompt_id.map(PromptId::as_str),
                            error = %e,
                            "audit event dropped"
                        );
                        None
                    }
                }
            }
        }
    }

    /// Verify the underlying chain.
    pub fn verify(&self, scope: VerifyScope) -> Result<VerificationReport, WardenError> {
        self.with_chain(|chain| chain.verify(scope))
    }

    /// Run `f` against the chain under the writer lock.
    pub fn with_chain<R>(&self, f: impl FnOnce(&AuditChain) -> R) -> R {
        match self.chain.lock() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

impl TransitionListener for AuditRecorder {
    fn on_transition(&self, transition: &Transition) {
        self.record(
            EVENT_PROMPT_TRANSITION,
            Some(transition.session_id),
            Some(&transition.prompt_id),
            transition,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::NamedTempFile;
    use warden_types::PromptState;

    #[test]
    fn transitions_are_chained() {
        let tmp = NamedTempFile::new().unwrap();
        let recorder = AuditRecorder::new(AuditChain::open(tmp.path()).unwrap());
        let session = Uuid::new_v4();
        let prompt = PromptId::new("prm-test");

        for (from, to) in [
            (PromptState::Created, PromptState::Routed),
            (PromptState::Routed, PromptState::AwaitingReply),
        ] {
            recorder.on_transition(&Transition {
                prompt_id: prompt.clone(),
                session_id: session,
                from,
                to,
                at: Utc::now(),
                forced: false,
                detail: None,
            });
        }

        let events = recorder.with_chain(|c| c.events_for_prompt(&prompt)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EVENT_PROMPT_TRANSITION);
        let payload = events[1].payload_value().unwrap();
        assert_eq!(payload["to"], "awaiting_reply");
        assert!(recorder.verify(VerifyScope::Session(session)).unwrap().valid);
    }

    #[test]
    fn failed_append_is_swallowed() {
        let tmp = NamedTempFile::new().unwrap();
        let chain = AuditChain::open(tmp.path()).unwrap();
        chain
            .connection()
            .execute("DROP TABLE audit_events", [])
            .unwrap();
        let recorder = AuditRecorder::new(chain);
        assert!(recorder
            .record("decision", None, None, &serde_json::json!({}))
            .is_none());
    }
}
