/// AuditChain: SQLite-backed append-only hash-chained audit log.
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use warden_types::{PromptId, WardenError};

use crate::event::{compute_hash, AuditEvent, GENESIS_HASH};
use crate::integrity::{VerificationError, VerificationReport, VerifyScope};

/// Default bound on the number of errors listed in a verification report.
pub const DEFAULT_MAX_REPORTED_ERRORS: usize = 50;

const SELECT_COLUMNS: &str =
    "id, event_type, session_id, prompt_id, payload, timestamp, prev_hash, hash";

/// An append-only, hash-chained audit log backed by SQLite.
pub struct AuditChain {
    conn: Connection,
    path: PathBuf,
    latest_hash: String,
    max_reported_errors: usize,
}

impl std::fmt::Debug for AuditChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditChain")
            .field("path", &self.path)
            .field("latest_hash", &self.latest_hash)
            .finish()
    }
}

impl AuditChain {
    /// Open (or create) the audit chain at the given path.
    ///
    /// Enables WAL mode, creates the `audit_events` table if it does not
    /// exist, and reads the chain tip (or uses the genesis hash).
    pub fn open(path: &Path) -> Result<Self, WardenError> {
        let conn = Connection::open(path)
            .map_err(|e| persistence(format!("failed to open database: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| persistence(format!("failed to set WAL mode: {e}")))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_events (
                id TEXT PRIMARY KEY NOT NULL,
                event_type TEXT NOT NULL,
                session_id TEXT,
                prompt_id TEXT,
                payload TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                prev_hash TEXT NOT NULL,
                hash TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_session ON audit_events(session_id);
            CREATE INDEX IF NOT EXISTS idx_audit_prompt ON audit_events(prompt_id);",
        )
        .map_err(|e| persistence(format!("failed to create schema: {e}")))?;

        let latest_hash: String = conn
            .query_row(
                "SELECT hash FROM audit_events ORDER BY rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| persistence(format!("failed to read chain tip: {e}")))?
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        info!(path = %path.display(), latest_hash = %latest_hash, "audit chain opened");

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            latest_hash,
            max_reported_errors: DEFAULT_MAX_REPORTED_ERRORS,
        })
    }

    /// Set the bound on errors listed in verification reports.
    pub fn with_max_reported_errors(mut self, max: usize) -> Self {
        self.max_reported_errors = max;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hash of the most recent event, or the genesis hash.
    pub fn latest_hash(&self) -> &str {
        &self.latest_hash
    }

    /// Append an event to the chain.
    ///
    /// The payload is stored as canonical JSON, exactly the bytes hashed.
    pub fn append<T: Serialize + ?Sized>(
        &mut self,
        event_type: &str,
        session_id: Option<Uuid>,
        prompt_id: Option<&PromptId>,
        payload: &T,
    ) -> Result<AuditEvent, WardenError> {
        let event = AuditEvent::new(
            event_type,
            session_id,
            prompt_id.cloned(),
            payload,
            self.latest_hash.clone(),
        )?;

        self.conn
            .execute(
                "INSERT INTO audit_events (id, event_type, session_id, prompt_id, payload, timestamp, prev_hash, hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.id.to_string(),
                    event.event_type,
                    event.session_id.map(|id| id.to_string()),
                    event.prompt_id.as_ref().map(|id| id.as_str().to_string()),
                    event.payload,
                    event.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                    event.prev_hash,
                    event.hash,
                ],
            )
            .map_err(|e| persistence(format!("failed to insert event: {e}")))?;

        self.latest_hash = event.hash.clone();
        Ok(event)
    }

    /// Verify the chain, reporting on the events selected by `scope`.
    pub fn verify(&self, scope: VerifyScope) -> Result<VerificationReport, WardenError> {
        verify_connection(&self.conn, scope, self.max_reported_errors)
    }

    /// Number of events in the chain.
    pub fn count(&self) -> Result<usize, WardenError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))
            .map_err(|e| persistence(format!("count failed: {e}")))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// The most recent `n` events, oldest first.
    pub fn last(&self, n: usize) -> Result<Vec<AuditEvent>, WardenError> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let mut events = self.query(
            &format!("SELECT {SELECT_COLUMNS} FROM audit_events ORDER BY rowid DESC LIMIT ?1"),
            params![limit],
        )?;
        events.reverse();
        Ok(events)
    }

    /// Every event recorded for a session, in chain order.
    pub fn events_for_session(&self, session_id: Uuid) -> Result<Vec<AuditEvent>, WardenError> {
        self.query(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM audit_events WHERE session_id = ?1 ORDER BY rowid ASC"
            ),
            params![session_id.to_string()],
        )
    }

    /// Every event recorded for a prompt, in chain order.
    pub fn events_for_prompt(&self, prompt_id: &PromptId) -> Result<Vec<AuditEvent>, WardenError> {
        self.query(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM audit_events WHERE prompt_id = ?1 ORDER BY rowid ASC"
            ),
            params![prompt_id.as_str()],
        )
    }

    fn query(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<AuditEvent>, WardenError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| persistence(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params, row_to_event)
            .map_err(|e| persistence(format!("failed to query events: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| persistence(format!("failed to read event: {e}")))
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Verify a chain file without taking a write handle.
///
/// Used by the CLI and other external readers while a writer is live.
pub fn verify_path(
    path: &Path,
    scope: VerifyScope,
    max_reported_errors: usize,
) -> Result<VerificationReport, WardenError> {
    if !path.exists() {
        return Err(persistence(format!(
            "audit database not found: {}",
            path.display()
        )));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| persistence(format!("failed to open database read-only: {e}")))?;
    verify_connection(&conn, scope, max_reported_errors)
}

/// Single pass over the chain inside one read transaction.
///
/// Each event is rehashed against the running recomputed hash, so once a
/// link breaks every later event fails as well.
fn verify_connection(
    conn: &Connection,
    scope: VerifyScope,
    max_errors: usize,
) -> Result<VerificationReport, WardenError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| persistence(format!("failed to begin read transaction: {e}")))?;

    let mut report = VerificationReport::empty(scope);
    {
        let mut stmt = tx
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM audit_events ORDER BY rowid ASC"
            ))
            .map_err(|e| persistence(format!("failed to prepare query: {e}")))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| persistence(format!("failed to query events: {e}")))?;

        let mut expected_prev = GENESIS_HASH.to_string();
        let mut position = 0usize;
        while let Some(row) = rows
            .next()
            .map_err(|e| persistence(format!("failed to read event: {e}")))?
        {
            let raw = RawEvent::from_row(row)
                .map_err(|e| persistence(format!("failed to read event: {e}")))?;
            let in_scope = scope.includes(raw.session_uuid());

            let (recomputed, problem) = raw.check(&expected_prev);
            if in_scope {
                report.total_events += 1;
                match problem {
                    None => report.verified_events += 1,
                    Some(message) => report.push_error(
                        VerificationError {
                            position,
                            event_id: raw.id.clone(),
                            event_type: raw.event_type.clone(),
                            message,
                        },
                        max_errors,
                    ),
                }
            }

            expected_prev = recomputed;
            position += 1;
        }
    }
    tx.commit()
        .map_err(|e| persistence(format!("failed to end read transaction: {e}")))?;

    if !report.valid {
        warn!(
            failed = report.failed_events(),
            first_break = ?report.first_break_position,
            "audit chain verification failed"
        );
    }
    Ok(report)
}

/// Row values as stored, before any parsing that could fail on tampered data.
struct RawEvent {
    id: String,
    event_type: String,
    session_id: Option<String>,
    payload: String,
    prev_hash: String,
    hash: String,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_type: row.get(1)?,
            session_id: row.get(2)?,
            payload: row.get(4)?,
            prev_hash: row.get(6)?,
            hash: row.get(7)?,
        })
    }

    fn session_uuid(&self) -> Option<Uuid> {
        self.session_id.as_deref().and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Returns the recomputed hash and the first problem found, if any.
    fn check(&self, expected_prev: &str) -> (String, Option<String>) {
        let Ok(id) = Uuid::parse_str(&self.id) else {
            let recomputed = warden_types::sha256_hex(format!(
                "{expected_prev}{}{}{}",
                self.id, self.event_type, self.payload
            ));
            return (recomputed, Some(format!("malformed event id '{}'", self.id)));
        };

        let canonical = serde_json::from_str::<serde_json::Value>(&self.payload)
            .ok()
            .and_then(|v| warden_types::canonical_json(&v).ok());
        let payload = canonical.as_deref().unwrap_or(&self.payload);
        let recomputed = compute_hash(expected_prev, &id, &self.event_type, payload);

        let problem = if self.prev_hash != expected_prev {
            Some(format!(
                "chain link broken: prev_hash '{}' does not match expected '{}'",
                self.prev_hash, expected_prev
            ))
        } else if canonical.as_deref() != Some(self.payload.as_str()) {
            Some("payload is not canonical JSON".to_string())
        } else if self.hash != recomputed {
            Some(format!(
                "hash mismatch: stored '{}', computed '{recomputed}'",
                self.hash
            ))
        } else {
            None
        };
        (recomputed, problem)
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    let id: String = row.get(0)?;
    let session_id: Option<String> = row.get(2)?;
    let prompt_id: Option<String> = row.get(3)?;
    let timestamp: String = row.get(5)?;
    Ok(AuditEvent {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        event_type: row.get(1)?,
        session_id: session_id
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| conversion_error(2, e))?,
        prompt_id: prompt_id.map(PromptId::from),
        payload: row.get(4)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(5, e))?,
        prev_hash: row.get(6)?,
        hash: row.get(7)?,
    })
}

fn conversion_error(
    column: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn persistence(message: String) -> WardenError {
    WardenError::PersistenceError(message)
}
