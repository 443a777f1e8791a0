//! Per-prompt lifecycle state machine.
//!
//! Transitions follow a total table. Anything not in the table is rejected
//! with [`WardenError::InvalidTransition`] and leaves the state unchanged.
//! TTL expiry is the one exception: [`PromptStateMachine::expire_if_due`]
//! may force EXPIRED from a state that has no such edge, and records the
//! transition as forced.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use warden_types::{PromptEvent, PromptId, PromptState, Transition, TransitionListener, WardenError};

/// States reachable in one step from `from`.
pub fn allowed_transitions(from: PromptState) -> &'static [PromptState] {
    use PromptState::*;
    match from {
        Created => &[Routed, ReplyReceived, Expired, Canceled, Failed],
        Routed => &[AwaitingReply, Expired, Canceled, Failed],
        AwaitingReply => &[ReplyReceived, Expired, Canceled, Failed],
        ReplyReceived => &[Injected, Canceled, Failed],
        Injected => &[Resolved, Failed],
        Resolved | Expired | Canceled | Failed => &[],
    }
}

pub fn can_transition(from: PromptState, to: PromptState) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Lifecycle of one detected prompt.
pub struct PromptStateMachine {
    event: PromptEvent,
    state: PromptState,
    history: Vec<Transition>,
    resolved_at: Option<DateTime<Utc>>,
    listener: Option<Arc<dyn TransitionListener>>,
}

impl fmt::Debug for PromptStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptStateMachine")
            .field("prompt_id", &self.event.prompt_id)
            .field("state", &self.state)
            .field("transitions", &self.history.len())
            .finish()
    }
}

impl PromptStateMachine {
    /// A new machine in CREATED.
    pub fn new(event: PromptEvent) -> Self {
        Self {
            event,
            state: PromptState::Created,
            history: Vec::new(),
            resolved_at: None,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TransitionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn prompt_id(&self) -> &PromptId {
        &self.event.prompt_id
    }

    pub fn session_id(&self) -> Uuid {
        self.event.session_id
    }

    pub fn event(&self) -> &PromptEvent {
        &self.event
    }

    pub fn state(&self) -> PromptState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Creation to RESOLVED. `None` until resolved.
    pub fn latency(&self) -> Option<Duration> {
        self.resolved_at.map(|at| at - self.event.created_at)
    }

    /// Take a table edge.
    pub fn transition(&mut self, to: PromptState) -> Result<(), WardenError> {
        self.transition_with(to, None)
    }

    /// Take a table edge, attaching a detail to the transition record.
    pub fn transition_with(
        &mut self,
        to: PromptState,
        detail: Option<String>,
    ) -> Result<(), WardenError> {
        if !can_transition(self.state, to) {
            return Err(WardenError::InvalidTransition {
                prompt_id: self.event.prompt_id.clone(),
                from: self.state,
                to,
            });
        }
        self.apply(to, Utc::now(), false, detail);
        Ok(())
    }

    /// Expire the prompt if its TTL has elapsed at `now`.
    ///
    /// Returns whether the machine moved to EXPIRED. From REPLY_RECEIVED or
    /// INJECTED, where the table has no expiry edge, the move is forced.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() || !self.event.is_expired_at(now) {
            return false;
        }
        let forced = !can_transition(self.state, PromptState::Expired);
        if forced {
            warn!(
                prompt_id = %self.event.prompt_id,
                from = %self.state,
                "forcing expiry past TTL"
            );
        }
        self.apply(
            PromptState::Expired,
            now,
            forced,
            Some(format!("ttl {}s elapsed", self.event.ttl_seconds)),
        );
        true
    }

    fn apply(&mut self, to: PromptState, at: DateTime<Utc>, forced: bool, detail: Option<String>) {
        let transition = Transition {
            prompt_id: self.event.prompt_id.clone(),
            session_id: self.event.session_id,
            from: self.state,
            to,
            at,
            forced,
            detail,
        };
        debug!(
            prompt_id = %transition.prompt_id,
            from = %transition.from,
            to = %transition.to,
            forced,
            "prompt transition"
        );
        self.state = to;
        if to == PromptState::Resolved {
            self.resolved_at = Some(at);
        }
        if let Some(listener) = &self.listener {
            listener.on_transition(&transition);
        }
        self.history.push(transition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use warden_types::{PromptType, Redactor};

    fn event(ttl: u64) -> PromptEvent {
        PromptEvent::builder(Uuid::new_v4(), PromptType::YesNo, "Continue? (y/n)")
            .ttl_seconds(ttl)
            .build(&Redactor::disabled())
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<(PromptState, PromptState, bool)>>);

    impl TransitionListener for Recording {
        fn on_transition(&self, t: &Transition) {
            self.0.lock().unwrap().push((t.from, t.to, t.forced));
        }
    }

    #[test]
    fn transition_table_is_total() {
        for from in PromptState::ALL {
            for to in PromptState::ALL {
                let mut machine = PromptStateMachine::new(event(300));
                machine.state = from;
                let result = machine.transition(to);
                if can_transition(from, to) {
                    assert!(result.is_ok(), "{from} -> {to} should be allowed");
                    assert_eq!(machine.state(), to);
                } else {
                    assert!(
                        matches!(result, Err(WardenError::InvalidTransition { .. })),
                        "{from} -> {to} should be rejected"
                    );
                    assert_eq!(machine.state(), from, "state must not change");
                }
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for state in PromptState::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert!(allowed_transitions(state).is_empty());
        }
    }

    #[test]
    fn happy_path_records_history_and_latency() {
        let listener = Arc::new(Recording::default());
        let mut machine = PromptStateMachine::new(event(300)).with_listener(listener.clone());
        for to in [
            PromptState::Routed,
            PromptState::AwaitingReply,
            PromptState::ReplyReceived,
            PromptState::Injected,
            PromptState::Resolved,
        ] {
            machine.transition(to).unwrap();
        }
        assert!(machine.is_terminal());
        assert_eq!(machine.history().len(), 5);
        assert!(machine.latency().unwrap() >= Duration::zero());
        assert_eq!(listener.0.lock().unwrap().len(), 5);
    }

    #[test]
    fn expiry_from_injected_is_forced() {
        let listener = Arc::new(Recording::default());
        let mut machine = PromptStateMachine::new(event(1)).with_listener(listener.clone());
        machine.transition(PromptState::ReplyReceived).unwrap();
        machine.transition(PromptState::Injected).unwrap();

        let later = machine.event().created_at + Duration::seconds(5);
        assert!(machine.expire_if_due(later));
        assert_eq!(machine.state(), PromptState::Expired);
        assert_eq!(
            listener.0.lock().unwrap().last(),
            Some(&(PromptState::Injected, PromptState::Expired, true))
        );
    }

    #[test]
    fn expiry_before_ttl_is_noop() {
        let mut machine = PromptStateMachine::new(event(300));
        assert!(!machine.expire_if_due(machine.event().created_at));
        assert_eq!(machine.state(), PromptState::Created);
    }

    #[test]
    fn awaiting_expiry_is_not_forced() {
        let mut machine = PromptStateMachine::new(event(1));
        machine.transition(PromptState::Routed).unwrap();
        machine.transition(PromptState::AwaitingReply).unwrap();
        let later = machine.event().created_at + Duration::seconds(2);
        assert!(machine.expire_if_due(later));
        assert!(!machine.history().last().unwrap().forced);
        assert!(!machine.expire_if_due(later), "already terminal");
    }
}
