//! Prompt lifecycle, routing, autopilot, and the governance service.
//!
//! Detected prompts enter the [`AutopilotEngine`], which evaluates policy
//! and either acts on its own or hands the prompt to the [`PromptRouter`]
//! for a human. Human replies come back through the [`Gate`] and the
//! router, which injects them through the [`Injector`] port. The
//! [`GovernanceService`] runs all of it on a single task.

pub mod autopilot;
pub mod executor;
pub mod gate;
pub mod mode;
pub mod ports;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod service;
pub mod sessions;
pub mod state;

pub use autopilot::{AutopilotEngine, EngineOutcome};
pub use executor::ActionExecutor;
pub use gate::{AcceptKind, Gate, GateInput, GateVerdict, InboundKind, RejectCode};
pub use mode::{EngineState, EngineStateStore, ModeHandle};
pub use ports::{dry_run_injection, Dispatch, HumanChannel, Injection, Injector, PortError, RouteSink};
pub use rate_limit::{RateDecision, RateLimiter};
pub use registry::{create_channel, list_channels, LogChannel, NullChannel};
pub use router::{NonceCache, PromptRouter, RejectReason, ReplyOutcome};
pub use service::{
    service_channels, GovernanceService, InboundMessage, InboundOutcome, ServiceCommand,
    ServiceEvent, ServiceHandle, ServiceInputs,
};
pub use sessions::SessionRegistry;
pub use state::{allowed_transitions, can_transition, PromptStateMachine};
