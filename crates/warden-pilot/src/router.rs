//! Per-session prompt routing and reply handling.
//!
//! The router owns every live [`PromptStateMachine`] and the
//! [`SessionRegistry`]. It is the only place prompt state changes, and it
//! runs on the single governance task.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use warden_ledger::{AuditRecorder, EVENT_REPLY_REJECTED};
use warden_types::{
    ActionEffect, ActionResult, PromptEvent, PromptId, PromptState, Reply, RouterConfig,
    SessionStatus, TransitionListener, WardenError,
};

use crate::mode::ModeHandle;
use crate::ports::{dry_run_injection, Dispatch, Injection, RouteSink};
use crate::sessions::SessionRegistry;
use crate::state::PromptStateMachine;

/// Why a reply was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    UnknownPrompt,
    SessionMismatch,
    AlreadyResolved,
    Expired,
    Canceled,
    Failed,
    NotAwaitingReply,
    DuplicateNonce,
    IdentityNotAllowed,
    Superseded,
    InvalidValue,
    EngineStopped,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::UnknownPrompt => "unknown_prompt",
            RejectReason::SessionMismatch => "session_mismatch",
            RejectReason::AlreadyResolved => "already_resolved",
            RejectReason::Expired => "expired",
            RejectReason::Canceled => "canceled",
            RejectReason::Failed => "failed",
            RejectReason::NotAwaitingReply => "not_awaiting_reply",
            RejectReason::DuplicateNonce => "duplicate_nonce",
            RejectReason::IdentityNotAllowed => "identity_not_allowed",
            RejectReason::Superseded => "superseded",
            RejectReason::InvalidValue => "invalid_value",
            RejectReason::EngineStopped => "engine_stopped",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of offering a reply to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Injected (or described, in dry run) and resolved.
    Accepted {
        prompt_id: PromptId,
        /// What was written, or the dry-run marker.
        detail: String,
        latency_ms: i64,
    },
    Rejected {
        prompt_id: PromptId,
        reason: RejectReason,
    },
    /// Accepted, but injection failed; the prompt is FAILED.
    InjectionFailed { prompt_id: PromptId, error: String },
}

impl ReplyOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ReplyOutcome::Accepted { .. })
    }

    pub fn rejection(&self) -> Option<&RejectReason> {
        match self {
            ReplyOutcome::Rejected { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Bounded set of consumed nonces, oldest evicted first.
#[derive(Debug)]
pub struct NonceCache {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl NonceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Consume `nonce`. Returns `false` if it was already consumed.
    pub fn consume(&mut self, nonce: &str) -> bool {
        if self.seen.contains(nonce) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(nonce.to_string());
        self.seen.insert(nonce.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub struct PromptRouter {
    sessions: SessionRegistry,
    machines: HashMap<PromptId, PromptStateMachine>,
    superseded: HashSet<PromptId>,
    nonces: NonceCache,
    dispatch: Dispatch,
    injection: Injection,
    mode: ModeHandle,
    global_identities: Vec<String>,
    listener: Option<Arc<dyn TransitionListener>>,
    audit: Option<Arc<AuditRecorder>>,
}

impl PromptRouter {
    /// A router over `sessions`. Dry-run mode is selected by passing the
    /// `DryRun` variants.
    pub fn new(
        sessions: SessionRegistry,
        dispatch: Dispatch,
        injection: Injection,
        mode: ModeHandle,
        config: &RouterConfig,
    ) -> Self {
        Self {
            sessions,
            machines: HashMap::new(),
            superseded: HashSet::new(),
            nonces: NonceCache::new(config.nonce_capacity),
            dispatch,
            injection,
            mode,
            global_identities: Vec::new(),
            listener: None,
            audit: None,
        }
    }

    /// Identities allowed to answer any session.
    pub fn with_global_identities(mut self, identities: Vec<String>) -> Self {
        self.global_identities = identities;
        self
    }

    /// Listener attached to every machine this router creates.
    pub fn with_listener(mut self, listener: Arc<dyn TransitionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Audit sink for rejected replies.
    pub fn with_audit(mut self, audit: Arc<AuditRecorder>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SessionRegistry {
        &mut self.sessions
    }

    pub fn machine(&self, prompt_id: &PromptId) -> Option<&PromptStateMachine> {
        self.machines.get(prompt_id)
    }

    /// Non-terminal machines.
    pub fn live_count(&self) -> usize {
        self.machines.values().filter(|m| !m.is_terminal()).count()
    }

    pub fn is_dry_run(&self) -> bool {
        self.injection.is_dry_run()
    }

    /// Where replies, chat turns, and interrupts are injected.
    pub fn injection(&self) -> &Injection {
        &self.injection
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Whether `identity` may answer prompts of `session_id`.
    ///
    /// Default deny: with no allow-list anywhere, nobody may answer.
    pub fn identity_allowed(&self, session_id: Uuid, identity: &str) -> bool {
        let in_session = self
            .sessions
            .get(&session_id)
            .map(|s| s.allowed_identities.iter().any(|i| i == identity))
            .unwrap_or(false);
        in_session || self.global_identities.iter().any(|i| i == identity)
    }

    /// Register a CREATED machine without routing it.
    ///
    /// The prompt becomes the session's active prompt, so a newer prompt
    /// answered by autopilot supersedes one still waiting on a human.
    pub fn track(&mut self, event: PromptEvent) -> Result<(), WardenError> {
        let prompt_id = event.prompt_id.clone();
        let session_id = event.session_id;
        self.ensure_machine(event)?;
        self.activate(session_id, &prompt_id)
    }

    /// Route a prompt to the human channel.
    ///
    /// Reuses a CREATED machine from [`track`](Self::track) if one exists.
    /// Any prompt still active on the session is superseded: both remain
    /// dispatched, only the newer one accepts replies. Returns the channel
    /// message id, or the dry-run marker.
    pub async fn route_event(&mut self, event: PromptEvent) -> Result<String, WardenError> {
        let prompt_id = event.prompt_id.clone();
        let session_id = event.session_id;
        let dispatched = self.ensure_machine(event)?.event().clone();
        self.activate(session_id, &prompt_id)?;

        let channel = self.dispatch.name().to_string();
        let machine = self.machine_mut(&prompt_id)?;
        machine.transition_with(PromptState::Routed, Some(format!("channel {channel}")))?;
        machine.transition(PromptState::AwaitingReply)?;

        match self.dispatch.clone() {
            Dispatch::DryRun => {
                let marker = format!(
                    "[DRY RUN] would send prompt {prompt_id} ({}) to a human",
                    dispatched.prompt_type
                );
                info!(session_id = %session_id, prompt_id = %prompt_id, "{marker}");
                Ok(marker)
            }
            Dispatch::Live(channel) => match channel.send_prompt(&dispatched).await {
                Ok(message_id) => {
                    debug!(prompt_id = %prompt_id, message_id = %message_id, "prompt dispatched");
                    Ok(message_id)
                }
                Err(e) => {
                    warn!(prompt_id = %prompt_id, error = %e, "prompt dispatch failed");
                    let detail = format!("dispatch failed: {e}");
                    if let Some(machine) = self.machines.get_mut(&prompt_id) {
                        machine.transition_with(PromptState::Failed, Some(detail))?;
                    }
                    self.sessions.release_prompt(session_id, &prompt_id);
                    Err(e.into())
                }
            },
        }
    }

    /// Offer a human reply. Never errors; every outcome is a value.
    pub async fn handle_reply(&mut self, reply: Reply) -> ReplyOutcome {
        let prompt_id = reply.prompt_id.clone();
        match self.check_reply(&reply) {
            Err(reason) => self.reject(&reply, reason),
            Ok(()) => self.accept_reply(reply).await.unwrap_or_else(|e| {
                warn!(prompt_id = %prompt_id, error = %e, "reply handling failed");
                ReplyOutcome::InjectionFailed {
                    prompt_id,
                    error: e.to_string(),
                }
            }),
        }
    }

    fn check_reply(&mut self, reply: &Reply) -> Result<(), RejectReason> {
        let machine = self
            .machines
            .get_mut(&reply.prompt_id)
            .ok_or(RejectReason::UnknownPrompt)?;
        if machine.session_id() != reply.session_id {
            return Err(RejectReason::SessionMismatch);
        }
        // Strangers must not be able to burn an operator's nonce.
        let identity_ok = self.global_identities.iter().any(|i| *i == reply.channel_identity)
            || self
                .sessions
                .get(&reply.session_id)
                .map(|s| s.allowed_identities.iter().any(|i| *i == reply.channel_identity))
                .unwrap_or(false);
        if !identity_ok {
            return Err(RejectReason::IdentityNotAllowed);
        }
        if !self.nonces.consume(&reply.nonce) {
            return Err(RejectReason::DuplicateNonce);
        }

        if machine.expire_if_due(Utc::now()) {
            self.sessions.release_prompt(reply.session_id, &reply.prompt_id);
            return Err(RejectReason::Expired);
        }
        match machine.state() {
            PromptState::AwaitingReply => {}
            PromptState::Resolved | PromptState::ReplyReceived | PromptState::Injected => {
                return Err(RejectReason::AlreadyResolved)
            }
            PromptState::Expired => return Err(RejectReason::Expired),
            PromptState::Canceled => return Err(RejectReason::Canceled),
            PromptState::Failed => return Err(RejectReason::Failed),
            PromptState::Created | PromptState::Routed => {
                return Err(RejectReason::NotAwaitingReply)
            }
        }
        if self.superseded.contains(&reply.prompt_id) {
            return Err(RejectReason::Superseded);
        }
        if !machine.event().accepts_value(&reply.value) {
            return Err(RejectReason::InvalidValue);
        }
        if self.mode.is_stopped() {
            return Err(RejectReason::EngineStopped);
        }
        Ok(())
    }

    async fn accept_reply(&mut self, reply: Reply) -> Result<ReplyOutcome, WardenError> {
        let prompt_id = reply.prompt_id.clone();
        let session_id = reply.session_id;
        let text = reply.injection_text();

        self.machine_mut(&prompt_id)?.transition_with(
            PromptState::ReplyReceived,
            Some(format!("from {}", reply.channel_identity)),
        )?;

        let detail = match self.injection.clone() {
            Injection::DryRun => dry_run_injection(session_id, &text),
            Injection::Live(injector) => {
                if let Err(e) = injector.inject(session_id, &text).await {
                    let error = e.to_string();
                    warn!(prompt_id = %prompt_id, error = %error, "reply injection failed");
                    self.machine_mut(&prompt_id)?
                        .transition_with(PromptState::Failed, Some(error.clone()))?;
                    self.sessions.release_prompt(session_id, &prompt_id);
                    return Ok(ReplyOutcome::InjectionFailed { prompt_id, error });
                }
                format!("injected {} byte(s)", text.len())
            }
        };

        let machine = self.machine_mut(&prompt_id)?;
        machine.transition(PromptState::Injected)?;
        machine.transition(PromptState::Resolved)?;
        let latency_ms = machine.latency().map(|d| d.num_milliseconds()).unwrap_or(0);
        self.sessions.release_prompt(session_id, &prompt_id);

        info!(
            session_id = %session_id,
            prompt_id = %prompt_id,
            latency_ms,
            dry_run = self.injection.is_dry_run(),
            "reply accepted"
        );
        Ok(ReplyOutcome::Accepted {
            prompt_id,
            detail,
            latency_ms,
        })
    }

    fn reject(&self, reply: &Reply, reason: RejectReason) -> ReplyOutcome {
        warn!(
            session_id = %reply.session_id,
            prompt_id = %reply.prompt_id,
            identity = %reply.channel_identity,
            reason = %reason,
            "reply rejected"
        );
        if let Some(audit) = &self.audit {
            audit.record(
                EVENT_REPLY_REJECTED,
                Some(reply.session_id),
                Some(&reply.prompt_id),
                &serde_json::json!({
                    "reason": reason,
                    "identity": reply.channel_identity,
                    "nonce": reply.nonce,
                }),
            );
        }
        ReplyOutcome::Rejected {
            prompt_id: reply.prompt_id.clone(),
            reason,
        }
    }

    /// Record an autopilot answer that was already injected:
    /// CREATED -> REPLY_RECEIVED -> INJECTED -> RESOLVED.
    pub fn resolve_auto(&mut self, prompt_id: &PromptId, value: &str) -> Result<(), WardenError> {
        let machine = self.machine_mut(prompt_id)?;
        if machine.state() != PromptState::Created {
            return Err(WardenError::InvalidTransition {
                prompt_id: prompt_id.clone(),
                from: machine.state(),
                to: PromptState::ReplyReceived,
            });
        }
        machine.transition_with(
            PromptState::ReplyReceived,
            Some(format!("autopilot value {value:?}")),
        )?;
        machine.transition(PromptState::Injected)?;
        machine.transition(PromptState::Resolved)?;
        let session_id = machine.session_id();
        self.sessions.release_prompt(session_id, prompt_id);
        Ok(())
    }

    /// Cancel one prompt.
    pub fn cancel(&mut self, prompt_id: &PromptId, reason: &str) -> Result<(), WardenError> {
        let machine = self.machine_mut(prompt_id)?;
        let session_id = machine.session_id();
        machine.transition_with(PromptState::Canceled, Some(reason.to_string()))?;
        self.sessions.release_prompt(session_id, prompt_id);
        Ok(())
    }

    /// Cancel every cancelable prompt of a session and mark it CANCELED.
    /// Returns the number of prompts canceled.
    pub fn cancel_session(&mut self, session_id: Uuid) -> Result<usize, WardenError> {
        let mut canceled = 0;
        for machine in self
            .machines
            .values_mut()
            .filter(|m| m.session_id() == session_id && !m.is_terminal())
        {
            match machine.transition_with(PromptState::Canceled, Some("session canceled".into())) {
                Ok(()) => canceled += 1,
                Err(e) => debug!(prompt_id = %machine.prompt_id(), error = %e, "left in flight"),
            }
        }
        self.sessions.set_status(session_id, SessionStatus::Canceled)?;
        info!(session_id = %session_id, canceled, "session canceled");
        Ok(canceled)
    }

    /// Expire every live prompt past its TTL. Returns the expired ids.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<PromptId> {
        let mut expired = Vec::new();
        for machine in self.machines.values_mut() {
            if machine.expire_if_due(now) {
                expired.push((machine.session_id(), machine.prompt_id().clone()));
            }
        }
        for (session_id, prompt_id) in &expired {
            self.sessions.release_prompt(*session_id, prompt_id);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired prompts swept");
        }
        expired.into_iter().map(|(_, id)| id).collect()
    }

    /// Keep at most `keep` terminal machines, dropping the oldest.
    pub fn prune_terminal(&mut self, keep: usize) -> usize {
        let mut terminal: Vec<(DateTime<Utc>, PromptId)> = self
            .machines
            .values()
            .filter(|m| m.is_terminal())
            .map(|m| (m.event().created_at, m.prompt_id().clone()))
            .collect();
        if terminal.len() <= keep {
            return 0;
        }
        terminal.sort();
        let drop = terminal.len() - keep;
        for (_, prompt_id) in terminal.into_iter().take(drop) {
            self.machines.remove(&prompt_id);
            self.superseded.remove(&prompt_id);
        }
        drop
    }

    /// Make `prompt_id` the session's active prompt. Any other live prompt
    /// that was active stays dispatched but no longer accepts replies.
    fn activate(&mut self, session_id: Uuid, prompt_id: &PromptId) -> Result<(), WardenError> {
        let previous = self.sessions.activate_prompt(session_id, prompt_id.clone())?;
        if let Some(old) = previous.filter(|old| old != prompt_id) {
            let still_live = self.machines.get(&old).map(|m| !m.is_terminal()).unwrap_or(false);
            if still_live {
                info!(
                    session_id = %session_id,
                    superseded = %old,
                    by = %prompt_id,
                    "prompt superseded"
                );
                self.superseded.insert(old);
            }
        }
        Ok(())
    }

    fn ensure_machine(&mut self, event: PromptEvent) -> Result<&PromptStateMachine, WardenError> {
        let prompt_id = event.prompt_id.clone();
        let session_id = event.session_id;

        if let Some(existing) = self.machines.get(&prompt_id) {
            if existing.state() != PromptState::Created {
                return Err(WardenError::UnknownOrStalePrompt {
                    prompt_id,
                    reason: format!("already {}", existing.state()),
                });
            }
        } else {
            let session = self
                .sessions
                .get_mut(&session_id)
                .ok_or(WardenError::UnknownSession(session_id))?;
            if session.status.is_terminal() {
                return Err(WardenError::UnknownOrStalePrompt {
                    prompt_id,
                    reason: format!("session is {}", session.status),
                });
            }
            session.prompt_count += 1;

            let mut machine = PromptStateMachine::new(event);
            if let Some(listener) = &self.listener {
                machine = machine.with_listener(listener.clone());
            }
            self.machines.insert(prompt_id.clone(), machine);
        }
        self.machine(&prompt_id)
            .ok_or_else(|| unknown(&prompt_id))
    }

    fn machine_mut(&mut self, prompt_id: &PromptId) -> Result<&mut PromptStateMachine, WardenError> {
        self.machines
            .get_mut(prompt_id)
            .ok_or_else(|| unknown(prompt_id))
    }
}

fn unknown(prompt_id: &PromptId) -> WardenError {
    WardenError::UnknownOrStalePrompt {
        prompt_id: prompt_id.clone(),
        reason: "not tracked".into(),
    }
}

#[async_trait]
impl RouteSink for PromptRouter {
    async fn route(&mut self, event: PromptEvent) -> ActionResult {
        let channel = self.dispatch.name().to_string();
        match self.route_event(event).await {
            Ok(id) if self.dispatch.is_dry_run() => ActionResult::ok(ActionEffect::DryRun, id),
            Ok(id) => ActionResult::ok(ActionEffect::Routed, format!("routed via {channel}: {id}")),
            Err(e) => ActionResult::failed(format!("routing failed: {e}")),
        }
    }

    fn injection(&self) -> &Injection {
        &self.injection
    }

    fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }
}
