//! The governance service loop.
//!
//! One task owns the engine, router, and rate limiter, and multiplexes
//! detected prompts, inbound channel messages, operator commands, and the
//! TTL sweep with `tokio::select!`. Nothing else mutates prompt or session
//! state, so no locks are needed around them.

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use warden_ledger::{AuditRecorder, EVENT_REPLY_REJECTED};
use warden_types::{
    render_injection, AgentActivity, EngineMode, NewSession, NewlinePolicy, PromptEvent, PromptId,
    Reply, SessionStatus,
};

use crate::autopilot::{AutopilotEngine, EngineOutcome};
use crate::gate::{AcceptKind, Gate, GateInput, GateVerdict, InboundKind, RejectCode};
use crate::ports::{dry_run_injection, Injection};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::router::{PromptRouter, ReplyOutcome};

/// Interrupt sent to the agent (Ctrl-C).
const INTERRUPT_SEQUENCE: &str = "\x03";

/// Terminal prompt machines kept for inspection after resolution.
const RETAINED_TERMINAL_PROMPTS: usize = 1024;

/// A message from a human channel.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel: String,
    pub user: String,
    pub kind: InboundKind,
    pub session_id: Uuid,
    /// The prompt a reply answers. Defaults to the session's active prompt.
    pub prompt_id: Option<PromptId>,
    pub value: String,
    pub nonce: String,
}

impl InboundMessage {
    pub fn reply(
        channel: impl Into<String>,
        user: impl Into<String>,
        session_id: Uuid,
        prompt_id: PromptId,
        value: impl Into<String>,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            user: user.into(),
            kind: InboundKind::Reply,
            session_id,
            prompt_id: Some(prompt_id),
            value: value.into(),
            nonce: nonce.into(),
        }
    }

    pub fn chat_turn(
        channel: impl Into<String>,
        user: impl Into<String>,
        session_id: Uuid,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            user: user.into(),
            kind: InboundKind::ChatTurn,
            session_id,
            prompt_id: None,
            value: text.into(),
            nonce: Uuid::new_v4().to_string(),
        }
    }

    pub fn interrupt(channel: impl Into<String>, user: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            channel: channel.into(),
            user: user.into(),
            kind: InboundKind::Interrupt,
            session_id,
            prompt_id: None,
            value: String::new(),
            nonce: Uuid::new_v4().to_string(),
        }
    }

    /// `<channel>:<user>`, the form allow-lists use.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.channel, self.user)
    }
}

/// Operator and supervisor commands.
#[derive(Debug)]
pub enum ServiceCommand {
    RegisterSession {
        session: NewSession,
        reply: oneshot::Sender<Uuid>,
    },
    SetSessionStatus {
        session_id: Uuid,
        status: SessionStatus,
    },
    SetActivity {
        session_id: Uuid,
        activity: AgentActivity,
    },
    CancelSession {
        session_id: Uuid,
    },
    SetMode {
        mode: EngineMode,
        reason: String,
    },
}

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    RateLimited { retry_after_secs: u64 },
    Gated(RejectCode),
    Reply(ReplyOutcome),
    /// A chat turn or interrupt was delivered (or described, in dry run).
    Delivered { kind: AcceptKind, detail: String },
    DeliveryFailed { kind: AcceptKind, error: String },
}

/// Observable service activity, for supervisors and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    PromptHandled {
        prompt_id: PromptId,
        outcome: EngineOutcome,
    },
    Inbound {
        identity: String,
        outcome: InboundOutcome,
    },
    Expired(Vec<PromptId>),
    CommandFailed(String),
}

/// Receiving ends consumed by [`GovernanceService::run`].
pub struct ServiceInputs {
    prompts: mpsc::Receiver<PromptEvent>,
    inbound: mpsc::Receiver<InboundMessage>,
    commands: mpsc::Receiver<ServiceCommand>,
    shutdown: watch::Receiver<bool>,
}

/// Sending ends, cheap to clone.
#[derive(Clone)]
pub struct ServiceHandle {
    prompts: mpsc::Sender<PromptEvent>,
    inbound: mpsc::Sender<InboundMessage>,
    commands: mpsc::Sender<ServiceCommand>,
    shutdown: std::sync::Arc<watch::Sender<bool>>,
}

/// Create a connected handle and input set.
pub fn service_channels(capacity: usize) -> (ServiceHandle, ServiceInputs) {
    let (prompt_tx, prompt_rx) = mpsc::channel(capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (command_tx, command_rx) = mpsc::channel(capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    (
        ServiceHandle {
            prompts: prompt_tx,
            inbound: inbound_tx,
            commands: command_tx,
            shutdown: std::sync::Arc::new(shutdown_tx),
        },
        ServiceInputs {
            prompts: prompt_rx,
            inbound: inbound_rx,
            commands: command_rx,
            shutdown: shutdown_rx,
        },
    )
}

impl ServiceHandle {
    /// Returns `false` once the service has stopped.
    pub async fn submit_prompt(&self, event: PromptEvent) -> bool {
        self.prompts.send(event).await.is_ok()
    }

    pub async fn submit_inbound(&self, message: InboundMessage) -> bool {
        self.inbound.send(message).await.is_ok()
    }

    pub async fn command(&self, command: ServiceCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub async fn register_session(&self, session: NewSession) -> Option<Uuid> {
        let (reply, rx) = oneshot::channel();
        if !self
            .command(ServiceCommand::RegisterSession { session, reply })
            .await
        {
            return None;
        }
        rx.await.ok()
    }

    pub async fn set_mode(&self, mode: EngineMode, reason: impl Into<String>) -> bool {
        self.command(ServiceCommand::SetMode {
            mode,
            reason: reason.into(),
        })
        .await
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub struct GovernanceService {
    engine: AutopilotEngine,
    router: PromptRouter,
    limiter: RateLimiter,
    sweep_interval: Duration,
    session_retention: chrono::Duration,
    audit: Option<std::sync::Arc<AuditRecorder>>,
    events: Option<mpsc::UnboundedSender<ServiceEvent>>,
}

impl GovernanceService {
    /// Chat turns and interrupts are delivered through the router's
    /// injection target, so dry run covers them too.
    pub fn new(engine: AutopilotEngine, router: PromptRouter, limiter: RateLimiter) -> Self {
        Self {
            engine,
            router,
            limiter,
            sweep_interval: Duration::from_secs(5),
            session_retention: chrono::Duration::hours(24),
            audit: None,
            events: None,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(Duration::from_millis(10));
        self
    }

    pub fn with_session_retention(mut self, retention: chrono::Duration) -> Self {
        self.session_retention = retention;
        self
    }

    /// Audit sink for gate rejections.
    pub fn with_audit(mut self, audit: std::sync::Arc<AuditRecorder>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<ServiceEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn router(&self) -> &PromptRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut PromptRouter {
        &mut self.router
    }

    pub fn engine(&self) -> &AutopilotEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AutopilotEngine {
        &mut self.engine
    }

    /// Run until shutdown is signalled or every handle is dropped. Returns
    /// the service so its final state can be inspected.
    pub async fn run(mut self, mut inputs: ServiceInputs) -> Self {
        info!(
            mode = %self.engine.mode(),
            dry_run = self.router.is_dry_run(),
            sweep_secs = self.sweep_interval.as_secs_f64(),
            "governance service started"
        );
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // Shutdown and operator commands win over queued work, so a stop
            // issued before a prompt is applied before that prompt.
            tokio::select! {
                biased;

                changed = inputs.shutdown.changed() => {
                    if changed.is_err() || *inputs.shutdown.borrow() {
                        break;
                    }
                }
                Some(command) = inputs.commands.recv() => {
                    self.on_command(command);
                }
                Some(message) = inputs.inbound.recv() => {
                    self.on_inbound(message).await;
                }
                Some(event) = inputs.prompts.recv() => {
                    self.on_prompt(event).await;
                }
                _ = sweep.tick() => {
                    self.on_sweep();
                }
            }
        }

        info!(live_prompts = self.router.live_count(), "governance service stopped");
        self
    }

    async fn on_prompt(&mut self, event: PromptEvent) {
        let prompt_id = event.prompt_id.clone();
        let outcome = self.engine.handle_prompt(event, &mut self.router).await;
        self.emit(ServiceEvent::PromptHandled { prompt_id, outcome });
    }

    async fn on_inbound(&mut self, message: InboundMessage) {
        let identity = message.identity();
        let outcome = self.admit(message).await;
        match &outcome {
            InboundOutcome::Reply(ReplyOutcome::Accepted { .. })
            | InboundOutcome::Delivered { .. } => {
                debug!(identity = %identity, "inbound message delivered")
            }
            other => debug!(identity = %identity, outcome = ?other, "inbound message not delivered"),
        }
        self.emit(ServiceEvent::Inbound { identity, outcome });
    }

    /// Rate limiter, then gate, then router or injector.
    async fn admit(&mut self, message: InboundMessage) -> InboundOutcome {
        let identity = message.identity();
        let rate = self
            .limiter
            .check(&message.channel, &message.user, Instant::now());
        let rate_limited = !rate.is_allowed();

        let session = self.router.sessions().get(&message.session_id);
        let prompt_id = message
            .prompt_id
            .clone()
            .or_else(|| session.and_then(|s| s.active_prompt_id.clone()));
        let machine = prompt_id.as_ref().and_then(|id| self.router.machine(id));

        let verdict = Gate::evaluate(&GateInput {
            kind: message.kind,
            session,
            prompt: machine.map(|m| m.event()),
            prompt_state: machine.map(|m| m.state()),
            value: &message.value,
            now: Utc::now(),
            identity_allowed: self.router.identity_allowed(message.session_id, &identity),
            rate_limited,
            policy_denied: self.engine.mode() == EngineMode::Stopped,
        });

        let kind = match verdict {
            GateVerdict::Accept(kind) => kind,
            GateVerdict::Reject(RejectCode::RateLimited) => {
                if let RateDecision::Limited { retry_after_secs } = rate {
                    self.audit_gate_reject(&message, &identity, RejectCode::RateLimited);
                    return InboundOutcome::RateLimited { retry_after_secs };
                }
                return InboundOutcome::Gated(RejectCode::RateLimited);
            }
            GateVerdict::Reject(code) => {
                warn!(
                    session_id = %message.session_id,
                    identity = %identity,
                    code = %code,
                    "inbound message rejected"
                );
                self.audit_gate_reject(&message, &identity, code);
                return InboundOutcome::Gated(code);
            }
        };

        match kind {
            AcceptKind::Reply => {
                let Some(prompt_id) = prompt_id else {
                    return InboundOutcome::Gated(RejectCode::NotAwaitingInput);
                };
                let reply = Reply::new(
                    prompt_id,
                    message.session_id,
                    message.value,
                    message.nonce,
                    identity,
                );
                InboundOutcome::Reply(self.router.handle_reply(reply).await)
            }
            AcceptKind::ChatTurn => {
                let text = render_injection(&message.value, NewlinePolicy::Auto);
                self.deliver(kind, message.session_id, &text).await
            }
            AcceptKind::Interrupt => {
                self.deliver(kind, message.session_id, INTERRUPT_SEQUENCE).await
            }
        }
    }

    async fn deliver(&self, kind: AcceptKind, session_id: Uuid, text: &str) -> InboundOutcome {
        match self.router.injection() {
            Injection::DryRun => InboundOutcome::Delivered {
                kind,
                detail: dry_run_injection(session_id, text),
            },
            Injection::Live(injector) => match injector.inject(session_id, text).await {
                Ok(()) => InboundOutcome::Delivered {
                    kind,
                    detail: format!("{} delivered", kind.as_str()),
                },
                Err(e) => {
                    warn!(session_id = %session_id, kind = kind.as_str(), error = %e, "delivery failed");
                    InboundOutcome::DeliveryFailed {
                        kind,
                        error: e.to_string(),
                    }
                }
            },
        }
    }

    fn on_command(&mut self, command: ServiceCommand) {
        let result = match command {
            ServiceCommand::RegisterSession { session, reply } => {
                let id = self.router.sessions_mut().register(session);
                let _ = reply.send(id);
                Ok(())
            }
            ServiceCommand::SetSessionStatus { session_id, status } => {
                if status == SessionStatus::Canceled {
                    self.router.cancel_session(session_id).map(|_| ())
                } else {
                    self.router.sessions_mut().set_status(session_id, status)
                }
            }
            ServiceCommand::SetActivity {
                session_id,
                activity,
            } => self.router.sessions_mut().set_activity(session_id, activity),
            ServiceCommand::CancelSession { session_id } => {
                self.router.cancel_session(session_id).map(|_| ())
            }
            ServiceCommand::SetMode { mode, reason } => {
                self.engine.set_mode(mode, &reason);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "service command failed");
            self.emit(ServiceEvent::CommandFailed(e.to_string()));
        }
    }

    fn on_sweep(&mut self) {
        let expired = self.router.sweep_expired(Utc::now());
        if !expired.is_empty() {
            self.emit(ServiceEvent::Expired(expired));
        }
        let pruned = self
            .router
            .sessions_mut()
            .prune_terminal(self.session_retention, Utc::now());
        let dropped = self.router.prune_terminal(RETAINED_TERMINAL_PROMPTS);
        if pruned + dropped > 0 {
            debug!(sessions = pruned, prompts = dropped, "pruned terminal state");
        }
        self.limiter.prune(Instant::now());
    }

    fn audit_gate_reject(&self, message: &InboundMessage, identity: &str, code: RejectCode) {
        if let Some(audit) = &self.audit {
            audit.record(
                EVENT_REPLY_REJECTED,
                Some(message.session_id),
                message.prompt_id.as_ref(),
                &serde_json::json!({
                    "reason": code,
                    "kind": message.kind,
                    "identity": identity,
                    "stage": "gate",
                }),
            );
        }
    }

    fn emit(&self, event: ServiceEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use warden_policy::PolicyEvaluator;
    use warden_types::{
        Action, AutonomyMode, Policy, PromptState, PromptType, RateLimitConfig, Redactor,
        RouterConfig, RuleMatch,
    };

    use super::*;
    use crate::executor::ActionExecutor;
    use crate::mode::ModeHandle;
    use crate::ports::fakes::{RecordingChannel, RecordingInjector};
    use crate::ports::Dispatch;
    use crate::sessions::SessionRegistry;

    struct Running {
        handle: ServiceHandle,
        events: mpsc::UnboundedReceiver<ServiceEvent>,
        task: tokio::task::JoinHandle<GovernanceService>,
        injector: Arc<RecordingInjector>,
    }

    fn start(autonomy: AutonomyMode, rate: RateLimitConfig) -> Running {
        start_with(autonomy, rate, false)
    }

    fn start_with(autonomy: AutonomyMode, rate: RateLimitConfig, dry_run: bool) -> Running {
        let injector = Arc::new(RecordingInjector::default());
        let channel = Arc::new(RecordingChannel::default());
        let mode = ModeHandle::default();
        let policy = Policy::new("svc", autonomy).with_rule(
            "confirm",
            RuleMatch {
                prompt_types: vec![PromptType::YesNo],
                ..Default::default()
            },
            Action::auto_reply("y"),
        );
        let engine = AutopilotEngine::new(
            PolicyEvaluator::new(policy).unwrap(),
            ActionExecutor::new(mode.clone()),
            mode.clone(),
        );
        let (injection, dispatch) = if dry_run {
            (Injection::DryRun, Dispatch::DryRun)
        } else {
            (Injection::Live(injector.clone()), Dispatch::Live(channel))
        };
        let router = PromptRouter::new(
            SessionRegistry::new(),
            dispatch,
            injection,
            mode,
            &RouterConfig::default(),
        );
        let (events_tx, events) = mpsc::unbounded_channel();
        let service = GovernanceService::new(engine, router, RateLimiter::new(rate).unwrap())
                .with_sweep_interval(Duration::from_millis(20))
            .with_events(events_tx);

        let (handle, inputs) = service_channels(16);
        let task = tokio::spawn(service.run(inputs));
        Running {
            handle,
            events,
            task,
            injector,
        }
    }

    async fn next_non_sweep(events: &mut mpsc::UnboundedReceiver<ServiceEvent>) -> ServiceEvent {
        loop {
            match events.recv().await {
                Some(ServiceEvent::Expired(_)) => continue,
                Some(event) => return event,
                None => panic!("service ended"),
            }
        }
    }

    fn session() -> NewSession {
        NewSession::new("claude", "claude").allow_identity("test:alice")
    }

    #[tokio::test]
    async fn human_reply_flows_through_gate_and_router() {
        let mut svc = start(AutonomyMode::Off, RateLimitConfig::default());
        let session_id = svc.handle.register_session(session()).await.unwrap();
        let event = PromptEvent::builder(session_id, PromptType::YesNo, "Continue? (y/n)")
            .build(&Redactor::disabled());
        let prompt_id = event.prompt_id.clone();
        assert!(svc.handle.submit_prompt(event).await);
        assert!(matches!(
            next_non_sweep(&mut svc.events).await,
            ServiceEvent::PromptHandled { .. }
        ));

        svc.handle
            .submit_inbound(InboundMessage::reply(
                "test",
                "alice",
                session_id,
                prompt_id.clone(),
                "y",
                "nonce-1",
            ))
            .await;
        match next_non_sweep(&mut svc.events).await {
            ServiceEvent::Inbound { identity, outcome } => {
                assert_eq!(identity, "test:alice");
                assert!(matches!(
                    outcome,
                    InboundOutcome::Reply(ReplyOutcome::Accepted { .. })
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(svc.injector.calls(), vec![(session_id, "y\r".to_string())]);

        svc.handle.shutdown();
        let service = svc.task.await.unwrap();
        assert_eq!(
            service.router().machine(&prompt_id).unwrap().state(),
            PromptState::Resolved
        );
    }

    #[tokio::test]
    async fn stranger_is_gated() {
        let mut svc = start(AutonomyMode::Off, RateLimitConfig::default());
        let session_id = svc.handle.register_session(session()).await.unwrap();
        svc.handle
            .submit_inbound(InboundMessage::chat_turn("test", "mallory", session_id, "hi"))
            .await;
        match next_non_sweep(&mut svc.events).await {
            ServiceEvent::Inbound { outcome, .. } => assert_eq!(
                outcome,
                InboundOutcome::Gated(RejectCode::IdentityNotAllowlisted)
            ),
            other => panic!("unexpected {other:?}"),
        }
        assert!(svc.injector.calls().is_empty());
        svc.handle.shutdown();
        svc.task.await.unwrap();
    }

    #[tokio::test]
    async fn rate_limit_applies_before_gate() {
        let mut svc = start(
            AutonomyMode::Off,
            RateLimitConfig {
                burst: 1,
                per_minute: 1,
            },
        );
        let session_id = svc.handle.register_session(session()).await.unwrap();
        for _ in 0..2 {
            svc.handle
                .submit_inbound(InboundMessage::interrupt("test", "alice", session_id))
                .await;
        }
        let first = next_non_sweep(&mut svc.events).await;
        let second = next_non_sweep(&mut svc.events).await;
        assert!(matches!(
            first,
            ServiceEvent::Inbound {
                outcome: InboundOutcome::Delivered { kind: AcceptKind::Interrupt, .. },
                ..
            }
        ));
        assert!(matches!(
            second,
            ServiceEvent::Inbound {
                outcome: InboundOutcome::RateLimited { .. },
                ..
            }
        ));
        assert_eq!(svc.injector.calls(), vec![(session_id, "\x03".to_string())]);
        svc.handle.shutdown();
        svc.task.await.unwrap();
    }

    #[tokio::test]
    async fn dry_run_never_touches_the_injector() {
        let mut svc = start_with(AutonomyMode::Off, RateLimitConfig::default(), true);
        let session_id = svc.handle.register_session(session()).await.unwrap();

        svc.handle
            .submit_inbound(InboundMessage::chat_turn("test", "alice", session_id, "status?"))
            .await;
        svc.handle
            .submit_inbound(InboundMessage::interrupt("test", "alice", session_id))
            .await;
        for expected in [AcceptKind::ChatTurn, AcceptKind::Interrupt] {
            match next_non_sweep(&mut svc.events).await {
                ServiceEvent::Inbound {
                    outcome: InboundOutcome::Delivered { kind, detail },
                    ..
                } => {
                    assert_eq!(kind, expected);
                    assert!(detail.starts_with("[DRY RUN]"), "{detail}");
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        let event = PromptEvent::builder(session_id, PromptType::YesNo, "Continue? (y/n)")
            .build(&Redactor::disabled());
        let prompt_id = event.prompt_id.clone();
        svc.handle.submit_prompt(event).await;
        next_non_sweep(&mut svc.events).await;
        svc.handle
            .submit_inbound(InboundMessage::reply(
                "test",
                "alice",
                session_id,
                prompt_id,
                "y",
                "nonce-dry",
            ))
            .await;
        match next_non_sweep(&mut svc.events).await {
            ServiceEvent::Inbound {
                outcome: InboundOutcome::Reply(ReplyOutcome::Accepted { detail, .. }),
                ..
            } => assert!(detail.starts_with("[DRY RUN]"), "{detail}"),
            other => panic!("unexpected {other:?}"),
        }

        assert!(svc.injector.calls().is_empty());
        svc.handle.shutdown();
        svc.task.await.unwrap();
    }

    #[tokio::test]
    async fn autopilot_and_kill_switch_via_commands() {
        let mut svc = start(AutonomyMode::Full, RateLimitConfig::default());
        let session_id = svc.handle.register_session(session()).await.unwrap();
        let prompt = || {
            PromptEvent::builder(session_id, PromptType::YesNo, "Continue? (y/n)")
                .build(&Redactor::disabled())
        };

        svc.handle.submit_prompt(prompt()).await;
        next_non_sweep(&mut svc.events).await;
        assert_eq!(svc.injector.calls().len(), 1);

        svc.handle.set_mode(EngineMode::Stopped, "test").await;
        svc.handle.submit_prompt(prompt()).await;
        match next_non_sweep(&mut svc.events).await {
            ServiceEvent::PromptHandled { outcome, .. } => {
                assert_eq!(outcome, EngineOutcome::Suppressed)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(svc.injector.calls().len(), 1);
        svc.handle.shutdown();
        svc.task.await.unwrap();
    }

    #[tokio::test]
    async fn sweep_expires_unanswered_prompts() {
        let mut svc = start(AutonomyMode::Off, RateLimitConfig::default());
        let session_id = svc.handle.register_session(session()).await.unwrap();
        let event = PromptEvent::builder(session_id, PromptType::YesNo, "Continue? (y/n)")
            .ttl_seconds(0)
            .build(&Redactor::disabled());
        let prompt_id = event.prompt_id.clone();
        svc.handle.submit_prompt(event).await;

        let expired = loop {
            match svc.events.recv().await {
                Some(ServiceEvent::Expired(ids)) => break ids,
                Some(_) => continue,
                None => panic!("service ended"),
            }
        };
        assert_eq!(expired, vec![prompt_id]);
        svc.handle.shutdown();
        svc.task.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_every_handle_stops_the_service() {
        let svc = start(AutonomyMode::Off, RateLimitConfig::default());
        drop(svc.handle);
        svc.task.await.unwrap();
    }
}
