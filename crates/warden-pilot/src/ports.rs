//! Ports to the collaborators outside the governance core.
//!
//! Process supervision is reached through [`Injector`], human channels
//! through [`HumanChannel`]. Both are wrapped in [`Injection`] and
//! [`Dispatch`], whose dry-run variants carry no collaborator at all, so a
//! dry run cannot inject or send by construction. The router is the only
//! owner of both; the executor and the service borrow them from it.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use warden_types::{ActionResult, PromptEvent, WardenError};

/// Errors from a collaborator port.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("target unavailable: {0}")]
    Unavailable(String),

    #[error("rejected by target: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

impl From<PortError> for WardenError {
    fn from(e: PortError) -> Self {
        WardenError::PortError(e.to_string())
    }
}

/// Writes text into a supervised agent's input stream.
#[async_trait]
pub trait Injector: Send + Sync {
    async fn inject(&self, session_id: Uuid, text: &str) -> Result<(), PortError>;
}

/// A human-facing notification channel.
#[async_trait]
pub trait HumanChannel: Send + Sync {
    /// Short name used in logs and identities (`<name>:<user>`).
    fn name(&self) -> &str;

    /// Present a prompt to a human. Returns the channel's message id.
    async fn send_prompt(&self, event: &PromptEvent) -> Result<String, PortError>;

    /// Send a notice that expects no reply.
    async fn notify(&self, session_id: Uuid, text: &str) -> Result<(), PortError>;
}

/// The human-facing side of the pipeline.
///
/// Forwards prompts for a human decision and owns the injection and
/// dispatch targets. Everything done for a prompt goes through these, so a
/// dry-run sink makes every action a dry run.
#[async_trait]
pub trait RouteSink: Send {
    async fn route(&mut self, event: PromptEvent) -> ActionResult;

    fn injection(&self) -> &Injection;

    fn dispatch(&self) -> &Dispatch;
}

/// Where injected text goes.
#[derive(Clone)]
pub enum Injection {
    Live(Arc<dyn Injector>),
    DryRun,
}

impl Injection {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, Injection::DryRun)
    }
}

impl std::fmt::Debug for Injection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Injection::Live(_) => f.write_str("Injection::Live"),
            Injection::DryRun => f.write_str("Injection::DryRun"),
        }
    }
}

/// Where prompts and notices go.
#[derive(Clone)]
pub enum Dispatch {
    Live(Arc<dyn HumanChannel>),
    DryRun,
}

impl Dispatch {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, Dispatch::DryRun)
    }

    /// Channel name for logs; `dry-run` when there is none.
    pub fn name(&self) -> &str {
        match self {
            Dispatch::Live(channel) => channel.name(),
            Dispatch::DryRun => "dry-run",
        }
    }
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Live(channel) => write!(f, "Dispatch::Live({})", channel.name()),
            Dispatch::DryRun => f.write_str("Dispatch::DryRun"),
        }
    }
}

/// The marker returned instead of injecting in dry-run mode.
pub fn dry_run_injection(session_id: Uuid, text: &str) -> String {
    format!("[DRY RUN] would inject {text:?} into session {session_id}")
}
