//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use uuid::Uuid;

use warden::ledger::{AuditChain, AuditRecorder, DecisionTrace};
use warden::pilot::{
    ActionExecutor, AutopilotEngine, Dispatch, EngineStateStore, HumanChannel, Injection,
    Injector, ModeHandle, PortError, PromptRouter, SessionRegistry,
};
use warden::policy::PolicyEvaluator;
use warden::types::{
    NewSession, Policy, PromptEvent, PromptType, Redactor, SessionStatus, WardenConfig,
};

pub const OPERATOR: &str = "telegram:1001";

/// Create a temporary directory for databases and traces.
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("should create temp dir")
}

/// Records every injection instead of writing to a process.
#[derive(Default)]
pub struct FakeInjector {
    pub injected: Mutex<Vec<(Uuid, String)>>,
    pub fail: bool,
}

impl FakeInjector {
    pub fn calls(&self) -> Vec<(Uuid, String)> {
        self.injected.lock().expect("injector lock").clone()
    }
}

#[async_trait]
impl Injector for FakeInjector {
    async fn inject(&self, session_id: Uuid, text: &str) -> Result<(), PortError> {
        if self.fail {
            return Err(PortError::Unavailable("process gone".into()));
        }
        self.injected
            .lock()
            .expect("injector lock")
            .push((session_id, text.to_string()));
        Ok(())
    }
}

/// Records prompts and notices instead of messaging anyone.
#[derive(Default)]
pub struct FakeChannel {
    pub prompts: Mutex<Vec<PromptEvent>>,
    pub notices: Mutex<Vec<(Uuid, String)>>,
}

impl FakeChannel {
    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().expect("channel lock").len()
    }

    pub fn notice_count(&self) -> usize {
        self.notices.lock().expect("channel lock").len()
    }
}

#[async_trait]
impl HumanChannel for FakeChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_prompt(&self, event: &PromptEvent) -> Result<String, PortError> {
        let mut prompts = self.prompts.lock().expect("channel lock");
        prompts.push(event.clone());
        Ok(format!("tg-{}", prompts.len()))
    }

    async fn notify(&self, session_id: Uuid, text: &str) -> Result<(), PortError> {
        self.notices
            .lock()
            .expect("channel lock")
            .push((session_id, text.to_string()));
        Ok(())
    }
}

/// A wired-up pipeline over fakes, persisting into a temp dir.
pub struct Pipeline {
    pub dir: TempDir,
    pub config: WardenConfig,
    pub engine: AutopilotEngine,
    pub router: PromptRouter,
    pub injector: Arc<FakeInjector>,
    pub channel: Arc<FakeChannel>,
    pub audit: Arc<AuditRecorder>,
    pub session_id: Uuid,
}

#[derive(Default)]
pub struct PipelineOptions {
    pub dry_run: bool,
    pub failing_injector: bool,
}

pub fn pipeline(policy: Policy) -> Pipeline {
    pipeline_with(policy, PipelineOptions::default())
}

pub fn pipeline_with(policy: Policy, options: PipelineOptions) -> Pipeline {
    let dir = temp_dir();
    let config = WardenConfig::default_for(dir.path());

    let injector = Arc::new(FakeInjector {
        fail: options.failing_injector,
        ..Default::default()
    });
    let channel = Arc::new(FakeChannel::default());
    let (injection, dispatch) = if options.dry_run {
        (Injection::DryRun, Dispatch::DryRun)
    } else {
        (
            Injection::Live(injector.clone()),
            Dispatch::Live(channel.clone()),
        )
    };

    let audit = Arc::new(AuditRecorder::new(
        AuditChain::open(&config.ledger_path).expect("should open audit chain"),
    ));
    let mode = ModeHandle::default();

    let mut sessions = SessionRegistry::new();
    let session_id = sessions.register(
        NewSession::new("claude", "claude --dangerously-skip-nothing")
            .label("nightly")
            .allow_identity(OPERATOR),
    );
    sessions
        .set_status(session_id, SessionStatus::Running)
        .expect("should start session");

    let router = PromptRouter::new(
        sessions,
        dispatch,
        injection,
        mode.clone(),
        &config.router,
    )
    .with_listener(audit.clone())
    .with_audit(audit.clone());

    let engine = AutopilotEngine::new(
        PolicyEvaluator::new(policy).expect("policy should compile"),
        ActionExecutor::new(mode.clone()),
        mode,
    )
    .with_state_store(EngineStateStore::new(&config.engine_state_path))
    .with_trace(DecisionTrace::open(&config.trace).expect("should open trace"))
    .with_audit(audit.clone());

    Pipeline {
        dir,
        config,
        engine,
        router,
        injector,
        channel,
        audit,
        session_id,
    }
}

/// A high-confidence prompt for `session_id`.
pub fn prompt(session_id: Uuid, prompt_type: PromptType, text: &str) -> PromptEvent {
    PromptEvent::builder(session_id, prompt_type, text)
        .confidence(warden::types::Confidence::High)
        .tool("claude")
        .build(&Redactor::disabled())
}
