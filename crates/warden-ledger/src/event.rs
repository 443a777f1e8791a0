//! AuditEvent: a single hash-chained audit record.
//!
//! Each event links to its predecessor through `prev_hash`. The hash covers
//! the previous hash, the event id, the event type, and the canonical JSON
//! encoding of the payload, in that order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use warden_types::{canonical_json, PromptId, WardenError};

/// `prev_hash` of the first event in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Event type recorded for every prompt lifecycle transition.
pub const EVENT_PROMPT_TRANSITION: &str = "prompt_transition";
/// Event type recorded for every governance decision.
pub const EVENT_DECISION: &str = "decision";
/// Event type recorded for every executed action.
pub const EVENT_ACTION: &str = "action_result";
/// Event type recorded for rejected replies.
pub const EVENT_REPLY_REJECTED: &str = "reply_rejected";
/// Event type recorded for engine mode changes.
pub const EVENT_ENGINE_MODE: &str = "engine_mode";

/// A single event in the audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_type: String,
    pub session_id: Option<Uuid>,
    pub prompt_id: Option<PromptId>,
    /// Canonical JSON text, exactly as hashed.
    pub payload: String,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditEvent {
    /// Build a new event chained onto `prev_hash`.
    pub fn new<T: Serialize + ?Sized>(
        event_type: &str,
        session_id: Option<Uuid>,
        prompt_id: Option<PromptId>,
        payload: &T,
        prev_hash: String,
    ) -> Result<Self, WardenError> {
        let id = Uuid::new_v4();
        let payload = canonical_json(payload)?;
        let hash = compute_hash(&prev_hash, &id, event_type, &payload);
        Ok(Self {
            id,
            event_type: event_type.to_string(),
            session_id,
            prompt_id,
            payload,
            timestamp: Utc::now(),
            prev_hash,
            hash,
        })
    }

    /// Parsed payload.
    pub fn payload_value(&self) -> Result<serde_json::Value, WardenError> {
        serde_json::from_str(&self.payload)
            .map_err(|e| WardenError::PersistenceError(format!("payload is not JSON: {e}")))
    }

    /// Recompute this event's hash from its stored fields.
    pub fn recompute_hash(&self) -> String {
        compute_hash(&self.prev_hash, &self.id, &self.event_type, &self.payload)
    }
}

/// `hex(SHA-256(prev_hash || id || event_type || canonical_payload))`.
pub fn compute_hash(prev_hash: &str, id: &Uuid, event_type: &str, canonical_payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(id.to_string().as_bytes());
    hasher.update(event_type.as_bytes());
    hasher.update(canonical_payload.as_bytes());
    hex::encode(hasher.finalize())
}
