//! Carries out a [`Decision`] against the ports.
//!
//! The executor owns no ports of its own: it injects and notifies through
//! the targets of the [`RouteSink`] it is given, so it can never disagree
//! with the router about dry-run mode.
//!
//! Failures never escape as errors: every path yields an [`ActionResult`].

use tracing::{info, warn};

use warden_types::{Action, ActionEffect, ActionResult, Decision, PromptEvent};

use crate::mode::ModeHandle;
use crate::ports::{dry_run_injection, Dispatch, Injection, RouteSink};

#[derive(Debug, Clone)]
pub struct ActionExecutor {
    mode: ModeHandle,
}

impl ActionExecutor {
    pub fn new(mode: ModeHandle) -> Self {
        Self { mode }
    }

    /// Execute `decision` for `event` through `sink`'s targets. Prompts
    /// needing a human are routed by `sink`.
    pub async fn execute(
        &self,
        decision: &Decision,
        event: &PromptEvent,
        sink: &mut dyn RouteSink,
    ) -> ActionResult {
        match &decision.action {
            Action::AutoReply { value } => {
                let injection = sink.injection().clone();
                self.auto_reply(&injection, event, value).await
            }
            Action::Deny { reason } => {
                let dispatch = sink.dispatch().clone();
                notify(&dispatch, event, &format!("[DENY] {reason}")).await
            }
            Action::NotifyOnly { message } => {
                let dispatch = sink.dispatch().clone();
                notify(&dispatch, event, message).await
            }
            Action::RequireHuman => sink.route(event.clone()).await,
            Action::Unrecognized => {
                warn!(prompt_id = %event.prompt_id, "unrecognized action, routing to a human");
                sink.route(event.clone()).await
            }
        }
    }

    async fn auto_reply(
        &self,
        injection: &Injection,
        event: &PromptEvent,
        value: &str,
    ) -> ActionResult {
        // The mode can change between evaluation and injection.
        if self.mode.is_stopped() {
            info!(prompt_id = %event.prompt_id, "engine stopped, auto-reply suppressed");
            return ActionResult::ok(ActionEffect::Suppressed, "engine stopped before injection");
        }
        match injection {
            Injection::DryRun => ActionResult::ok(
                ActionEffect::DryRun,
                dry_run_injection(event.session_id, value),
            ),
            Injection::Live(injector) => match injector.inject(event.session_id, value).await {
                Ok(()) => {
                    info!(
                        session_id = %event.session_id,
                        prompt_id = %event.prompt_id,
                        "auto-reply injected"
                    );
                    ActionResult::ok(ActionEffect::Injected, format!("injected {value:?}"))
                }
                Err(e) => {
                    warn!(prompt_id = %event.prompt_id, error = %e, "auto-reply injection failed");
                    ActionResult::failed(format!("injection failed: {e}"))
                }
            },
        }
    }
}

async fn notify(dispatch: &Dispatch, event: &PromptEvent, text: &str) -> ActionResult {
    match dispatch {
        Dispatch::DryRun => ActionResult::ok(
            ActionEffect::DryRun,
            format!("[DRY RUN] would notify session {}: {text}", event.session_id),
        ),
        Dispatch::Live(channel) => match channel.notify(event.session_id, text).await {
            Ok(()) => ActionResult::ok(ActionEffect::Notified, text),
            Err(e) => {
                warn!(prompt_id = %event.prompt_id, error = %e, "notification failed");
                ActionResult::failed(format!("notify via {} failed: {e}", channel.name()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use uuid::Uuid;
    use warden_types::{
        AutonomyMode, DecisionReason, EngineMode, PromptType, Redactor, RiskAssessment,
    };

    use super::*;
    use crate::ports::fakes::{RecordingChannel, RecordingInjector};

    struct CountingSink {
        routed: Vec<PromptEvent>,
        injection: Injection,
        dispatch: Dispatch,
    }

    impl CountingSink {
        fn new(injection: Injection, dispatch: Dispatch) -> Self {
            Self {
                routed: Vec::new(),
                injection,
                dispatch,
            }
        }
    }

    #[async_trait]
    impl RouteSink for CountingSink {
        async fn route(&mut self, event: PromptEvent) -> ActionResult {
            self.routed.push(event);
            ActionResult::ok(ActionEffect::Routed, "routed")
        }

        fn injection(&self) -> &Injection {
            &self.injection
        }

        fn dispatch(&self) -> &Dispatch {
            &self.dispatch
        }
    }

    fn decision(action: Action) -> Decision {
        Decision {
            matched_rule: None,
            action,
            reason: DecisionReason::RuleMatch,
            policy_hash: "0".repeat(64),
            autonomy: AutonomyMode::Full,
            idempotency_key: "k".into(),
            risk: RiskAssessment::none(),
        }
    }

    fn event() -> PromptEvent {
        PromptEvent::builder(Uuid::new_v4(), PromptType::YesNo, "Continue? (y/n)")
            .build(&Redactor::disabled())
    }

    struct Fixture {
        executor: ActionExecutor,
        sink: CountingSink,
        injector: Arc<RecordingInjector>,
        channel: Arc<RecordingChannel>,
        mode: ModeHandle,
    }

    fn fixture_with(injector: RecordingInjector, channel: RecordingChannel) -> Fixture {
        let injector = Arc::new(injector);
        let channel = Arc::new(channel);
        let mode = ModeHandle::default();
        Fixture {
            executor: ActionExecutor::new(mode.clone()),
            sink: CountingSink::new(
                Injection::Live(injector.clone()),
                Dispatch::Live(channel.clone()),
            ),
            injector,
            channel,
            mode,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingInjector::default(), RecordingChannel::default())
    }

    #[tokio::test]
    async fn auto_reply_injects_literal_value() {
        let mut f = fixture();
        let e = event();
        let result = f
            .executor
            .execute(&decision(Action::auto_reply("y")), &e, &mut f.sink)
            .await;
        assert_eq!(result.effect, ActionEffect::Injected);
        assert_eq!(f.injector.calls(), vec![(e.session_id, "y".to_string())]);
    }

    #[tokio::test]
    async fn stopped_engine_suppresses_injection() {
        let mut f = fixture();
        f.mode.set(EngineMode::Stopped);
        let result = f
            .executor
            .execute(&decision(Action::auto_reply("y")), &event(), &mut f.sink)
            .await;
        assert_eq!(result.effect, ActionEffect::Suppressed);
        assert!(f.injector.calls().is_empty());
    }

    #[tokio::test]
    async fn injection_failure_is_captured() {
        let mut f = fixture_with(RecordingInjector::failing(), RecordingChannel::default());
        let result = f
            .executor
            .execute(&decision(Action::auto_reply("y")), &event(), &mut f.sink)
            .await;
        assert!(!result.success);
        assert_eq!(result.effect, ActionEffect::Failed);
    }

    #[tokio::test]
    async fn deny_notifies_and_injects_nothing() {
        let mut f = fixture();
        let e = event();
        let result = f
            .executor
            .execute(&decision(Action::deny("force push")), &e, &mut f.sink)
            .await;
        assert_eq!(result.effect, ActionEffect::Notified);
        assert_eq!(
            f.channel.notices(),
            vec![(e.session_id, "[DENY] force push".to_string())]
        );
        assert!(f.injector.calls().is_empty());
    }

    #[tokio::test]
    async fn notify_failure_is_captured() {
        let mut f = fixture_with(RecordingInjector::default(), RecordingChannel::failing());
        let result = f
            .executor
            .execute(&decision(Action::notify_only("fyi")), &event(), &mut f.sink)
            .await;
        assert_eq!(result.effect, ActionEffect::Failed);
    }

    #[tokio::test]
    async fn require_human_and_unrecognized_route() {
        let mut f = fixture();
        for action in [Action::RequireHuman, Action::Unrecognized] {
            let result = f.executor.execute(&decision(action), &event(), &mut f.sink).await;
            assert_eq!(result.effect, ActionEffect::Routed);
        }
        assert_eq!(f.sink.routed.len(), 2);
        assert!(f.injector.calls().is_empty());
    }

    #[tokio::test]
    async fn dry_run_describes_instead_of_acting() {
        let executor = ActionExecutor::new(ModeHandle::default());
        let mut sink = CountingSink::new(Injection::DryRun, Dispatch::DryRun);
        for action in [Action::auto_reply("y"), Action::notify_only("hello")] {
            let result = executor.execute(&decision(action), &event(), &mut sink).await;
            assert_eq!(result.effect, ActionEffect::DryRun);
            assert!(result.detail.starts_with("[DRY RUN]"));
        }
    }
}
