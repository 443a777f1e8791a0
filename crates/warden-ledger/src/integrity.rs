//! Verification scope and report for the audit chain.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which events a verification reports on.
///
/// The whole chain is always walked, since a session's events are linked
/// through events of other sessions. The scope only selects which events
/// are counted and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "session_id", rename_all = "snake_case")]
pub enum VerifyScope {
    Full,
    Session(Uuid),
}

impl VerifyScope {
    pub(crate) fn includes(&self, session_id: Option<Uuid>) -> bool {
        match self {
            VerifyScope::Full => true,
            VerifyScope::Session(id) => session_id == Some(*id),
        }
    }
}

/// One event that failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationError {
    /// Zero-based position in the full chain.
    pub position: usize,
    pub event_id: String,
    pub event_type: String,
    pub message: String,
}

/// The result of verifying the audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub scope: VerifyScope,
    pub valid: bool,
    /// Events in scope.
    pub total_events: usize,
    /// Events in scope whose hash and link both check out.
    pub verified_events: usize,
    /// The first errors found, at most the configured bound.
    pub errors: Vec<VerificationError>,
    pub first_break_event_id: Option<String>,
    pub first_break_position: Option<usize>,
    /// Errors found beyond the bound and not listed in `errors`.
    pub truncated_errors: usize,
}

impl VerificationReport {
    pub(crate) fn empty(scope: VerifyScope) -> Self {
        Self {
            scope,
            valid: true,
            total_events: 0,
            verified_events: 0,
            errors: Vec::new(),
            first_break_event_id: None,
            first_break_position: None,
            truncated_errors: 0,
        }
    }

    /// Record a failed event, respecting the error bound.
    pub(crate) fn push_error(&mut self, error: VerificationError, max_errors: usize) {
        self.valid = false;
        if self.first_break_position.is_none() {
            self.first_break_position = Some(error.position);
            self.first_break_event_id = Some(error.event_id.clone());
        }
        if self.errors.len() < max_errors {
            self.errors.push(error);
        } else {
            self.truncated_errors += 1;
        }
    }

    /// Total number of failed events, listed or not.
    pub fn failed_events(&self) -> usize {
        self.errors.len() + self.truncated_errors
    }

    /// Multi-line report for terminals.
    pub fn to_human(&self) -> String {
        let mut out = String::new();
        let scope = match self.scope {
            VerifyScope::Full => "full chain".to_string(),
            VerifyScope::Session(id) => format!("session {id}"),
        };
        if self.valid {
            let _ = writeln!(
                out,
                "audit chain OK ({scope}): {}/{} events verified",
                self.verified_events, self.total_events
            );
            return out;
        }

        let _ = writeln!(
            out,
            "audit chain BROKEN ({scope}): {}/{} events verified, {} failed",
            self.verified_events,
            self.total_events,
            self.failed_events()
        );
        if let (Some(position), Some(id)) = (self.first_break_position, &self.first_break_event_id)
        {
            let _ = writeln!(out, "first break at position {position} (event {id})");
        }
        for error in &self.errors {
            let _ = writeln!(
                out,
                "  #{} {} [{}]: {}",
                error.position, error.event_id, error.event_type, error.message
            );
        }
        if self.truncated_errors > 0 {
            let _ = writeln!(out, "  ... {} more error(s) not shown", self.truncated_errors);
        }
        out
    }
}
