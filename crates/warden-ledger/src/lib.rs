//! Tamper-evident audit chain and decision trace.
//!
//! The [`AuditChain`] is the system of record: an append-only SQLite table
//! in which every event is hash-linked to its predecessor. The
//! [`DecisionTrace`] is a rotating NDJSON log with one line per decision,
//! meant for humans and log shippers.

pub mod chain;
pub mod event;
pub mod integrity;
pub mod recorder;
pub mod trace;

pub use chain::{verify_path, AuditChain, DEFAULT_MAX_REPORTED_ERRORS};
pub use event::{
    compute_hash, AuditEvent, EVENT_ACTION, EVENT_DECISION, EVENT_ENGINE_MODE,
    EVENT_PROMPT_TRANSITION, EVENT_REPLY_REJECTED, GENESIS_HASH,
};
pub use integrity::{VerificationError, VerificationReport, VerifyScope};
pub use recorder::AuditRecorder;
pub use trace::{read_tail, DecisionTrace, TraceRecord};
