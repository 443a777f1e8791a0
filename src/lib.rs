//! Warden: a governance pipeline for human-in-the-loop AI agents.
//!
//! This facade re-exports the workspace crates:
//!
//! - [`types`]: shared domain types, configuration, and errors
//! - [`policy`]: rule evaluation and risk scoring
//! - [`ledger`]: the hash-chained audit log and decision trace
//! - [`pilot`]: prompt routing, autopilot, and the governance service

pub use warden_ledger as ledger;
pub use warden_pilot as pilot;
pub use warden_policy as policy;
pub use warden_types as types;
