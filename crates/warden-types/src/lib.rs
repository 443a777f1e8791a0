//! Core types shared across all Warden crates.
//!
//! Defines prompts, replies, sessions, policies, decisions, configuration,
//! and the error type used by the policy evaluator, audit ledger, and the
//! governance pipeline.

pub mod action;
pub mod canonical;
pub mod config;
pub mod decision;
pub mod error;
pub mod ids;
pub mod policy;
pub mod prompt;
pub mod redaction;
pub mod session;
pub mod transition;

pub use action::{Action, ActionEffect, ActionResult, SafeAction};
pub use canonical::{canonical_hash, canonical_json, sha256_hex};
pub use config::{
    RateLimitConfig, RedactionConfig, RouterConfig, TraceConfig, WardenConfig, CONFIG_FILENAME,
    ENGINE_STATE_FILENAME, LEDGER_FILENAME, MAX_TRACE_ARCHIVES, TRACE_FILENAME,
};
pub use decision::{Decision, DecisionReason, MatchedRule, RiskAssessment, RiskCategory};
pub use error::WardenError;
pub use ids::PromptId;
pub use policy::{AutonomyMode, EngineMode, Policy, PolicyDefaults, PolicyRule, RuleMatch};
pub use prompt::{
    render_injection, Confidence, NewlinePolicy, PromptConstraints, PromptEvent,
    PromptEventBuilder, PromptState, PromptType, Reply,
};
pub use redaction::Redactor;
pub use session::{AgentActivity, NewSession, Session, SessionStatus};
pub use transition::{Transition, TransitionListener};
