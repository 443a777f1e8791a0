//! The autopilot engine: evaluate each detected prompt and act on it.
//!
//! The engine mode gates everything:
//!
//! - RUNNING: the policy is evaluated and the decision executed
//! - PAUSED (or policy autonomy `off`): every prompt goes to a human
//! - STOPPED: prompts are suppressed; nothing is tracked, routed, or injected
//!
//! Each decision is written to the decision trace and, with its action
//! result, to the audit chain.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use warden_ledger::{
    AuditRecorder, DecisionTrace, TraceRecord, EVENT_ACTION, EVENT_DECISION, EVENT_ENGINE_MODE,
};
use warden_policy::{PolicyEvaluator, PromptContext};
use warden_types::{
    Action, ActionEffect, ActionResult, AutonomyMode, Decision, DecisionReason, EngineMode,
    PromptEvent,
};

use crate::executor::ActionExecutor;
use crate::mode::{EngineState, EngineStateStore, ModeHandle};
use crate::ports::RouteSink;
use crate::router::PromptRouter;

/// What the engine did with one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    /// Engine stopped; the prompt was dropped.
    Suppressed,
    Handled {
        decision: Decision,
        result: ActionResult,
    },
}

impl EngineOutcome {
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            EngineOutcome::Handled { decision, .. } => Some(decision),
            EngineOutcome::Suppressed => None,
        }
    }

    pub fn result(&self) -> Option<&ActionResult> {
        match self {
            EngineOutcome::Handled { result, .. } => Some(result),
            EngineOutcome::Suppressed => None,
        }
    }
}

#[derive(Serialize)]
struct DecisionPayload<'a> {
    decision: &'a Decision,
    engine_mode: EngineMode,
    context: &'a PromptContext,
}

pub struct AutopilotEngine {
    evaluator: PolicyEvaluator,
    executor: ActionExecutor,
    mode: ModeHandle,
    store: Option<EngineStateStore>,
    trace: Option<DecisionTrace>,
    audit: Option<Arc<AuditRecorder>>,
}

impl AutopilotEngine {
    pub fn new(evaluator: PolicyEvaluator, executor: ActionExecutor, mode: ModeHandle) -> Self {
        Self {
            evaluator,
            executor,
            mode,
            store: None,
            trace: None,
            audit: None,
        }
    }

    /// Persist mode changes to `store`, starting from its saved mode.
    pub fn with_state_store(mut self, store: EngineStateStore) -> Self {
        let saved = store.load_mode();
        if saved != EngineMode::Running {
            info!(mode = %saved, path = %store.path().display(), "restored engine mode");
        }
        self.mode.set(saved);
        self.store = Some(store);
        self
    }

    pub fn with_trace(mut self, trace: DecisionTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditRecorder>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn mode(&self) -> EngineMode {
        self.mode.get()
    }

    pub fn mode_handle(&self) -> ModeHandle {
        self.mode.clone()
    }

    pub fn evaluator(&self) -> &PolicyEvaluator {
        &self.evaluator
    }

    /// Swap in a new policy. Prompts already in flight keep their decision.
    pub fn set_evaluator(&mut self, evaluator: PolicyEvaluator) {
        info!(
            policy = %evaluator.policy().name,
            policy_hash = %evaluator.policy_hash(),
            "policy replaced"
        );
        self.evaluator = evaluator;
    }

    pub fn pause(&mut self, reason: &str) -> EngineMode {
        self.set_mode(EngineMode::Paused, reason)
    }

    pub fn resume(&mut self, reason: &str) -> EngineMode {
        self.set_mode(EngineMode::Running, reason)
    }

    /// Kill switch. Takes effect before the next injection anywhere.
    pub fn stop(&mut self, reason: &str) -> EngineMode {
        self.set_mode(EngineMode::Stopped, reason)
    }

    /// Change mode, persist it, and audit the change. Returns the previous
    /// mode. Persistence failures are logged; the new mode applies anyway.
    pub fn set_mode(&mut self, mode: EngineMode, reason: &str) -> EngineMode {
        let previous = self.mode.get();
        self.mode.set(mode);
        info!(from = %previous, to = %mode, reason, "engine mode changed");

        if let Some(store) = &self.store {
            let state = EngineState {
                mode,
                updated_at: Utc::now(),
                reason: Some(reason.to_string()),
            };
            if let Err(e) = store.save(&state) {
                error!(error = %e, "failed to persist engine mode");
            }
        }
        if let Some(audit) = &self.audit {
            audit.record(
                EVENT_ENGINE_MODE,
                None,
                None,
                &serde_json::json!({
                    "from": previous,
                    "to": mode,
                    "reason": reason,
                }),
            );
        }
        previous
    }

    /// Decide on and act on one detected prompt.
    pub async fn handle_prompt(
        &mut self,
        event: PromptEvent,
        router: &mut PromptRouter,
    ) -> EngineOutcome {
        let mode = self.mode.get();
        if mode == EngineMode::Stopped {
            info!(prompt_id = %event.prompt_id, "engine stopped, prompt suppressed");
            self.audit_result(
                &event,
                &ActionResult::ok(ActionEffect::Suppressed, "engine stopped"),
            );
            return EngineOutcome::Suppressed;
        }

        let ctx = PromptContext::from_event(&event);
        let forced = match (mode, self.evaluator.autonomy()) {
            (EngineMode::Paused, _) => Some(DecisionReason::EnginePaused),
            (_, AutonomyMode::Off) => Some(DecisionReason::AutonomyOff),
            _ => None,
        };

        let (decision, result) = match forced {
            Some(reason) => {
                let decision = self.evaluator.forced_human(&ctx, reason);
                let result = router.route(event.clone()).await;
                (decision, result)
            }
            None => match router.track(event.clone()) {
                Ok(()) => {
                    let decision = self.evaluator.evaluate(&ctx);
                    let result = self.run(&decision, &event, router).await;
                    (decision, result)
                }
                Err(e) => {
                    warn!(prompt_id = %event.prompt_id, error = %e, "prompt not tracked");
                    let decision = self.evaluator.evaluate(&ctx);
                    (decision, ActionResult::failed(format!("not tracked: {e}")))
                }
            },
        };

        info!(
            session_id = %event.session_id,
            prompt_id = %event.prompt_id,
            action = %decision.action,
            reason = %decision.reason,
            effect = ?result.effect,
            success = result.success,
            "prompt handled"
        );
        self.record(&event, mode, &ctx, &decision, &result);
        EngineOutcome::Handled { decision, result }
    }

    async fn run(
        &self,
        decision: &Decision,
        event: &PromptEvent,
        router: &mut PromptRouter,
    ) -> ActionResult {
        let result = self.executor.execute(decision, event, router).await;
        let prompt_id = &event.prompt_id;

        match &decision.action {
            Action::AutoReply { value } => match result.effect {
                ActionEffect::Injected | ActionEffect::DryRun => {
                    if let Err(e) = router.resolve_auto(prompt_id, value) {
                        warn!(prompt_id = %prompt_id, error = %e, "could not resolve auto-reply");
                    }
                    result
                }
                ActionEffect::Suppressed => {
                    self.cancel(router, event, "engine stopped");
                    result
                }
                _ => {
                    // Injection failed; a human still has to answer.
                    let routed = router.route(event.clone()).await;
                    ActionResult {
                        detail: format!("{}; fallback: {}", result.detail, routed.detail),
                        ..routed
                    }
                }
            },
            Action::Deny { reason } => {
                self.cancel(router, event, &format!("denied: {reason}"));
                result
            }
            Action::NotifyOnly { .. } => {
                self.cancel(router, event, "notify only");
                result
            }
            Action::RequireHuman | Action::Unrecognized => result,
        }
    }

    fn cancel(&self, router: &mut PromptRouter, event: &PromptEvent, reason: &str) {
        if let Err(e) = router.cancel(&event.prompt_id, reason) {
            warn!(prompt_id = %event.prompt_id, error = %e, "could not cancel prompt");
        }
    }

    fn record(
        &mut self,
        event: &PromptEvent,
        mode: EngineMode,
        ctx: &PromptContext,
        decision: &Decision,
        result: &ActionResult,
    ) {
        if let Some(trace) = self.trace.as_mut() {
            trace.record(&TraceRecord {
                timestamp: Utc::now(),
                session_id: event.session_id,
                prompt_id: event.prompt_id.clone(),
                engine_mode: mode,
                decision: decision.clone(),
                result: Some(result.clone()),
            });
        }
        if let Some(audit) = &self.audit {
            audit.record(
                EVENT_DECISION,
                Some(event.session_id),
                Some(&event.prompt_id),
                &DecisionPayload {
                    decision,
                    engine_mode: mode,
                    context: ctx,
                },
            );
        }
        self.audit_result(event, result);
    }

    fn audit_result(&self, event: &PromptEvent, result: &ActionResult) {
        if let Some(audit) = &self.audit {
            audit.record(
                EVENT_ACTION,
                Some(event.session_id),
                Some(&event.prompt_id),
                result,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;
    use warden_ledger::{read_tail, AuditChain, VerifyScope};
    use warden_types::{
        NewSession, Policy, PromptState, PromptType, Redactor, RouterConfig, RuleMatch,
        SessionStatus, TraceConfig,
    };

    use super::*;
    use crate::ports::fakes::{RecordingChannel, RecordingInjector};
    use crate::ports::{Dispatch, Injection};
    use crate::sessions::SessionRegistry;

    struct Rig {
        engine: AutopilotEngine,
        router: PromptRouter,
        injector: Arc<RecordingInjector>,
        channel: Arc<RecordingChannel>,
        audit: Arc<AuditRecorder>,
        session: Uuid,
        _dir: tempfile::TempDir,
    }

    fn policy(autonomy: AutonomyMode) -> Policy {
        Policy::new("test", autonomy)
            .with_rule(
                "deny-force-push",
                RuleMatch {
                    command_pattern: Some(r"push\s+--force".into()),
                    ..Default::default()
                },
                Action::deny("force push"),
            )
            .with_rule(
                "confirm",
                RuleMatch {
                    prompt_types: vec![PromptType::YesNo],
                    ..Default::default()
                },
                Action::auto_reply("y"),
            )
    }

    fn rig_with(autonomy: AutonomyMode, injector: RecordingInjector) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditRecorder::new(
            AuditChain::open(&dir.path().join("audit.db")).unwrap(),
        ));
        let trace = DecisionTrace::open(&TraceConfig {
            path: dir.path().join("decisions.jsonl"),
            max_bytes: 1024 * 1024,
            max_archives: 3,
        })
        .unwrap();

        let injector = Arc::new(injector);
        let channel = Arc::new(RecordingChannel::default());
        let mode = ModeHandle::default();

        let mut sessions = SessionRegistry::new();
        let session = sessions.register(NewSession::new("claude", "claude"));
        sessions.set_status(session, SessionStatus::Running).unwrap();
        let router = PromptRouter::new(
            sessions,
            Dispatch::Live(channel.clone()),
            Injection::Live(injector.clone()),
            mode.clone(),
            &RouterConfig::default(),
        )
        .with_listener(audit.clone());

        let executor = ActionExecutor::new(mode.clone());
        let engine = AutopilotEngine::new(PolicyEvaluator::new(policy(autonomy)).unwrap(), executor, mode)
            .with_state_store(EngineStateStore::new(dir.path().join("engine_state.json")))
            .with_trace(trace)
            .with_audit(audit.clone());

        Rig {
            engine,
            router,
            injector,
            channel,
            audit,
            session,
            _dir: dir,
        }
    }

    fn rig(autonomy: AutonomyMode) -> Rig {
        rig_with(autonomy, RecordingInjector::default())
    }

    fn prompt(session: Uuid, text: &str) -> PromptEvent {
        PromptEvent::builder(session, PromptType::YesNo, text).build(&Redactor::disabled())
    }

    #[tokio::test]
    async fn full_autonomy_auto_replies_and_resolves() {
        let mut rig = rig(AutonomyMode::Full);
        let event = prompt(rig.session, "Run tests? (y/n)");
        let outcome = rig.engine.handle_prompt(event.clone(), &mut rig.router).await;

        assert_eq!(outcome.decision().unwrap().action, Action::auto_reply("y"));
        assert_eq!(outcome.result().unwrap().effect, ActionEffect::Injected);
        assert_eq!(rig.injector.calls(), vec![(rig.session, "y".to_string())]);
        assert_eq!(
            rig.router.machine(&event.prompt_id).unwrap().state(),
            PromptState::Resolved
        );
        assert_eq!(rig.channel.prompt_count(), 0);

        let events = rig
            .audit
            .with_chain(|c| c.events_for_prompt(&event.prompt_id))
            .unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(types.contains(&EVENT_DECISION));
        assert!(types.contains(&EVENT_ACTION));
        assert!(rig.audit.verify(VerifyScope::Full).unwrap().valid);

        let trace_path = rig.engine.trace.as_ref().unwrap().path().to_path_buf();
        let records = read_tail(&trace_path, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prompt_id, event.prompt_id);
    }

    #[tokio::test]
    async fn autonomy_off_routes_to_human() {
        let mut rig = rig(AutonomyMode::Off);
        let event = prompt(rig.session, "Run tests? (y/n)");
        let outcome = rig.engine.handle_prompt(event.clone(), &mut rig.router).await;

        let decision = outcome.decision().unwrap();
        assert_eq!(decision.action, Action::RequireHuman);
        assert_eq!(decision.reason, DecisionReason::AutonomyOff);
        assert_eq!(outcome.result().unwrap().effect, ActionEffect::Routed);
        assert!(rig.injector.calls().is_empty());
        assert_eq!(rig.channel.prompt_count(), 1);
        assert_eq!(
            rig.router.machine(&event.prompt_id).unwrap().state(),
            PromptState::AwaitingReply
        );
    }

    #[tokio::test]
    async fn paused_engine_routes_everything() {
        let mut rig = rig(AutonomyMode::Full);
        rig.engine.pause("maintenance");
        let outcome = rig
            .engine
            .handle_prompt(prompt(rig.session, "Run tests? (y/n)"), &mut rig.router)
            .await;
        assert_eq!(outcome.decision().unwrap().reason, DecisionReason::EnginePaused);
        assert!(rig.injector.calls().is_empty());
        assert_eq!(rig.channel.prompt_count(), 1);
    }

    #[tokio::test]
    async fn stopped_engine_suppresses_and_persists() {
        let mut rig = rig(AutonomyMode::Full);
        rig.engine.stop("operator kill switch");
        let event = prompt(rig.session, "Run tests? (y/n)");
        let outcome = rig.engine.handle_prompt(event.clone(), &mut rig.router).await;

        assert_eq!(outcome, EngineOutcome::Suppressed);
        assert!(rig.injector.calls().is_empty());
        assert_eq!(rig.channel.prompt_count(), 0);
        assert!(rig.router.machine(&event.prompt_id).is_none());

        let store = EngineStateStore::new(rig._dir.path().join("engine_state.json"));
        assert_eq!(store.load_mode(), EngineMode::Stopped);
    }

    #[tokio::test]
    async fn deny_notifies_and_cancels() {
        let mut rig = rig(AutonomyMode::Full);
        let event = prompt(rig.session, "git push --force origin main? (y/n)");
        let outcome = rig.engine.handle_prompt(event.clone(), &mut rig.router).await;

        assert_eq!(outcome.result().unwrap().effect, ActionEffect::Notified);
        assert_eq!(rig.channel.notices().len(), 1);
        assert!(rig.injector.calls().is_empty());
        assert_eq!(
            rig.router.machine(&event.prompt_id).unwrap().state(),
            PromptState::Canceled
        );
    }

    #[tokio::test]
    async fn failed_injection_falls_back_to_human() {
        let mut rig = rig_with(AutonomyMode::Full, RecordingInjector::failing());
        let event = prompt(rig.session, "Run tests? (y/n)");
        let outcome = rig.engine.handle_prompt(event.clone(), &mut rig.router).await;

        let result = outcome.result().unwrap();
        assert_eq!(result.effect, ActionEffect::Routed);
        assert!(result.detail.contains("injection failed"));
        assert_eq!(
            rig.router.machine(&event.prompt_id).unwrap().state(),
            PromptState::AwaitingReply
        );
    }

    #[tokio::test]
    async fn mode_changes_are_audited() {
        let mut rig = rig(AutonomyMode::Full);
        assert_eq!(rig.engine.pause("a"), EngineMode::Running);
        assert_eq!(rig.engine.resume("b"), EngineMode::Paused);
        let count = rig
            .audit
            .with_chain(|c| c.last(10))
            .unwrap()
            .iter()
            .filter(|e| e.event_type == EVENT_ENGINE_MODE)
            .count();
        assert_eq!(count, 2);
    }
}
