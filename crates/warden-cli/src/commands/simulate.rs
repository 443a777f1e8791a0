//! `warden simulate`: push one prompt through the full pipeline.
//!
//! Nothing is ever injected: the injection port is always the dry-run
//! variant. Prompts needing a human go to the configured channel unless
//! `router.dry_run` is set. With `--record`, decisions are written to the
//! configured audit chain and trace.

use std::sync::Arc;

use anyhow::{Context, Result};

use warden_ledger::{AuditChain, AuditRecorder, DecisionTrace};
use warden_pilot::{
    create_channel, ActionExecutor, AutopilotEngine, Dispatch, EngineOutcome, EngineStateStore,
    Injection, ModeHandle, PromptRouter, ReplyOutcome, SessionRegistry,
};
use warden_policy::PolicyEvaluator;
use warden_types::{
    NewSession, Policy, PromptEvent, PromptState, Redactor, Reply, SessionStatus, WardenConfig,
};

use crate::commands::policy::PromptArgs;

/// Identity the simulated operator replies as.
pub const OPERATOR_IDENTITY: &str = "cli:operator";

#[derive(Debug)]
pub struct Simulation {
    pub outcome: EngineOutcome,
    pub final_state: Option<PromptState>,
    pub reply: Option<ReplyOutcome>,
}

pub fn run(
    config: &WardenConfig,
    policy: Policy,
    prompt: &PromptArgs,
    reply: Option<&str>,
    record: bool,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    let sim = runtime.block_on(simulate(config, policy, prompt, reply, record))?;

    match &sim.outcome {
        EngineOutcome::Suppressed => println!("Engine stopped: prompt suppressed."),
        EngineOutcome::Handled { decision, result } => {
            println!("Decision: {} ({})", decision.action, decision.reason);
            if let Some(rule) = &decision.matched_rule {
                println!("  Rule:   [{}] {}", rule.index, rule.name);
            }
            println!(
                "  Risk:   {} ({}) {}",
                decision.risk.category,
                decision.risk.score,
                decision.risk.signals.join(", ")
            );
            println!("Result:   {:?} success={} {}", result.effect, result.success, result.detail);
        }
    }
    if let Some(reply) = &sim.reply {
        println!("Reply:    {reply:?}");
    }
    if let Some(state) = sim.final_state {
        println!("State:    {state}");
    }
    Ok(())
}

pub async fn simulate(
    config: &WardenConfig,
    policy: Policy,
    prompt: &PromptArgs,
    reply: Option<&str>,
    record: bool,
) -> Result<Simulation> {
    let ctx = prompt.context()?;
    let redactor = Redactor::from_config(&config.redaction)?;

    let mut sessions = SessionRegistry::new();
    let mut session = NewSession::new(
        ctx.tool_id.clone(),
        "warden simulate",
    )
    .allow_identity(OPERATOR_IDENTITY);
    if !ctx.session_tag.is_empty() {
        session = session.label(ctx.session_tag.clone());
    }
    let session_id = sessions.register(session);
    sessions.set_status(session_id, SessionStatus::Running)?;

    let dispatch = if config.router.dry_run {
        Dispatch::DryRun
    } else {
        Dispatch::Live(create_channel(&config.channel)?)
    };
    let mode = ModeHandle::default();
    let mut router = PromptRouter::new(
        sessions,
        dispatch,
        Injection::DryRun,
        mode.clone(),
        &config.router,
    )
    .with_global_identities(config.allowed_identities.clone());

    let executor = ActionExecutor::new(mode.clone());
    let mut engine = AutopilotEngine::new(PolicyEvaluator::new(policy)?, executor, mode)
        .with_state_store(EngineStateStore::new(&config.engine_state_path));

    if record {
        let chain = AuditChain::open(&config.ledger_path)
            .context("failed to open audit chain")?
            .with_max_reported_errors(config.max_reported_errors);
        let audit = Arc::new(AuditRecorder::new(chain));
        router = router.with_listener(audit.clone()).with_audit(audit.clone());
        engine = engine
            .with_trace(DecisionTrace::open(&config.trace)?)
            .with_audit(audit);
    }

    let event = PromptEvent::builder(session_id, ctx.prompt_type, &ctx.prompt_text)
        .confidence(ctx.confidence)
        .ttl_seconds(config.router.default_ttl_secs)
        .tool(&ctx.tool_id)
        .repo(&ctx.repo)
        .session_label(&ctx.session_tag)
        .environment(&ctx.environment)
        .build(&redactor);
    let prompt_id = event.prompt_id.clone();

    let outcome = engine.handle_prompt(event, &mut router).await;

    let awaiting = router
        .machine(&prompt_id)
        .map(|m| m.state() == PromptState::AwaitingReply)
        .unwrap_or(false);
    let reply = match reply {
        Some(value) if awaiting => Some(
            router
                .handle_reply(Reply::new(
                    prompt_id.clone(),
                    session_id,
                    value,
                    uuid::Uuid::new_v4().to_string(),
                    OPERATOR_IDENTITY,
                ))
                .await,
        ),
        _ => None,
    };

    Ok(Simulation {
        outcome,
        final_state: router.machine(&prompt_id).map(|m| m.state()),
        reply,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_ledger::{verify_path, VerifyScope};
    use warden_policy::builtin::builtin_policy;
    use warden_types::{ActionEffect, EngineMode};

    fn args(text: &str, prompt_type: &str) -> PromptArgs {
        PromptArgs {
            text: text.into(),
            prompt_type: prompt_type.into(),
            confidence: "high".into(),
            ..Default::default()
        }
    }

    fn config(dir: &std::path::Path) -> WardenConfig {
        let mut config = WardenConfig::default_for(dir);
        config.channel = "null".into();
        config
    }

    #[tokio::test]
    async fn autopilot_answers_in_dry_run() {
        let tmp = tempfile::tempdir().unwrap();
        let sim = simulate(
            &config(tmp.path()),
            builtin_policy("ci-autopilot").unwrap(),
            &args("Run tests? (y/n)", "yes_no"),
            None,
            false,
        )
        .await
        .unwrap();
        assert_eq!(sim.outcome.result().unwrap().effect, ActionEffect::DryRun);
        assert_eq!(sim.final_state, Some(PromptState::Resolved));
        assert!(!tmp.path().join("audit.db").exists(), "nothing recorded");
    }

    #[tokio::test]
    async fn supervised_prompt_takes_operator_reply() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let sim = simulate(
            &config,
            builtin_policy("supervised").unwrap(),
            &args("Delete branch? (y/n)", "yes_no"),
            Some("n"),
            true,
        )
        .await
        .unwrap();
        assert!(sim.reply.unwrap().is_accepted());
        assert_eq!(sim.final_state, Some(PromptState::Resolved));

        let report = verify_path(&config.ledger_path, VerifyScope::Full, 50).unwrap();
        assert!(report.valid);
        assert!(report.total_events > 0);
    }

    #[tokio::test]
    async fn saved_stop_suppresses() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        crate::commands::engine::set(&config, EngineMode::Stopped, None).unwrap();
        let sim = simulate(
            &config,
            builtin_policy("ci-autopilot").unwrap(),
            &args("Run tests? (y/n)", "yes_no"),
            None,
            false,
        )
        .await
        .unwrap();
        assert_eq!(sim.outcome, EngineOutcome::Suppressed);
        assert_eq!(sim.final_state, None);
    }
}
