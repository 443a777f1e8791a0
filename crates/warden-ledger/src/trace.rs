//! Append-only NDJSON decision trace with size-based rotation.
//!
//! Every governance decision is written as one JSON line. When the current
//! file would exceed `max_bytes` it is renamed to `<path>.1`, older
//! archives shift up by one, and anything beyond `max_archives` is
//! discarded. Readers never take locks: [`read_tail`] tolerates a missing
//! file, a partially written last line, and a rotation that happens while
//! it reads.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use warden_types::{
    ActionResult, Decision, EngineMode, PromptId, TraceConfig, WardenError, MAX_TRACE_ARCHIVES,
};

/// One line of the decision trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    pub prompt_id: PromptId,
    pub engine_mode: EngineMode,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
}

/// Rotating NDJSON writer for [`TraceRecord`]s.
pub struct DecisionTrace {
    path: PathBuf,
    max_bytes: u64,
    max_archives: usize,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl DecisionTrace {
    /// Open or create the trace file for appending. `max_archives` is
    /// clamped to [`MAX_TRACE_ARCHIVES`].
    pub fn open(config: &TraceConfig) -> Result<Self, WardenError> {
        if config.max_archives > MAX_TRACE_ARCHIVES {
            warn!(
                configured = config.max_archives,
                max = MAX_TRACE_ARCHIVES,
                "trace max_archives clamped"
            );
        }
        let mut trace = Self {
            path: config.path.clone(),
            max_bytes: config.max_bytes.max(1),
            max_archives: config.max_archives.min(MAX_TRACE_ARCHIVES),
            writer: None,
            written: 0,
        };
        trace.reopen()?;
        Ok(trace)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of archive `n` (1 is the newest).
    pub fn archive_path(path: &Path, n: usize) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    /// Append one record, rotating first if it would overflow the file.
    ///
    /// A failed write reopens the file and retries once.
    pub fn append(&mut self, record: &TraceRecord) -> Result<(), WardenError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| WardenError::PersistenceError(format!("trace serialization: {e}")))?;
        line.push(b'\n');

        if self.written > 0 && self.written + line.len() as u64 > self.max_bytes {
            self.rotate()?;
        }

        if let Err(first) = self.write_line(&line) {
            warn!(path = %self.path.display(), error = %first, "trace write failed, reopening");
            self.reopen()?;
            self.write_line(&line).map_err(|e| {
                WardenError::PersistenceError(format!(
                    "trace write failed after reopen: {e}"
                ))
            })?;
        }
        Ok(())
    }

    /// Append and log any failure instead of returning it.
    pub fn record(&mut self, record: &TraceRecord) {
        if let Err(e) = self.append(record) {
            error!(
                session_id = %record.session_id,
                prompt_id = %record.prompt_id,
                error = %e,
                "decision trace record dropped"
            );
        }
    }

    fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotConnected, "trace file not open"))?;
        writer.write_all(line)?;
        writer.flush()?;
        self.written += line.len() as u64;
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), WardenError> {
        self.writer = None;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    WardenError::PersistenceError(format!(
                        "failed to create trace directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                WardenError::PersistenceError(format!(
                    "failed to open trace {}: {e}",
                    self.path.display()
                ))
            })?;
        self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), WardenError> {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }

        if self.max_archives == 0 {
            let _ = fs::remove_file(&self.path);
        } else {
            let oldest = Self::archive_path(&self.path, self.max_archives);
            if oldest.exists() {
                let _ = fs::remove_file(&oldest);
            }
            for n in (1..self.max_archives).rev() {
                let from = Self::archive_path(&self.path, n);
                if from.exists() {
                    let _ = fs::rename(&from, Self::archive_path(&self.path, n + 1));
                }
            }
            fs::rename(&self.path, Self::archive_path(&self.path, 1)).map_err(|e| {
                WardenError::PersistenceError(format!("trace rotation failed: {e}"))
            })?;
        }

        debug!(path = %self.path.display(), "decision trace rotated");
        self.reopen()
    }
}

/// The last `n` records, oldest first, reaching into `<path>.1` when the
/// current file holds fewer than `n`.
pub fn read_tail(path: &Path, n: usize) -> Result<Vec<TraceRecord>, WardenError> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut records = read_records(path)?;
    if records.len() < n {
        let mut older = read_records(&DecisionTrace::archive_path(path, 1))?;
        older.append(&mut records);
        records = older;
    }
    let skip = records.len().saturating_sub(n);
    Ok(records.split_off(skip))
}

/// Parse every complete line of one file. A missing file is empty.
fn read_records(path: &Path) -> Result<Vec<TraceRecord>, WardenError> {
    let content = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(WardenError::PersistenceError(format!(
                "failed to read trace {}: {e}",
                path.display()
            )))
        }
    };

    let mut records = Vec::new();
    for line in content.split(|b| *b == b'\n') {
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<TraceRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable trace line"),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::{Action, AutonomyMode, DecisionReason, RiskAssessment};

    fn record(seq: usize) -> TraceRecord {
        TraceRecord {
            timestamp: Utc::now(),
            session_id: Uuid::new_v4(),
            prompt_id: PromptId::new(format!("prm-{seq}")),
            engine_mode: EngineMode::Running,
            decision: Decision {
                matched_rule: None,
                action: Action::RequireHuman,
                reason: DecisionReason::NoMatchDefault,
                policy_hash: "a".repeat(64),
                autonomy: AutonomyMode::Full,
                idempotency_key: "b".repeat(64),
                risk: RiskAssessment::none(),
            },
            result: None,
        }
    }

    fn config(dir: &Path, max_bytes: u64) -> TraceConfig {
        TraceConfig {
            path: dir.join("decisions.jsonl"),
            max_bytes,
            max_archives: 3,
        }
    }

    #[test]
    fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1024 * 1024);
        let mut trace = DecisionTrace::open(&cfg).unwrap();
        for i in 0..5 {
            trace.append(&record(i)).unwrap();
        }
        let content = fs::read_to_string(&cfg.path).unwrap();
        assert_eq!(content.lines().count(), 5);

        let tail = read_tail(&cfg.path, 2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].prompt_id.as_str(), "prm-3");
        assert_eq!(tail[1].prompt_id.as_str(), "prm-4");
    }

    #[test]
    fn rotation_keeps_at_most_three_archives() {
        let dir = tempfile::tempdir().unwrap();
        let line_len = serde_json::to_vec(&record(0)).unwrap().len() as u64 + 1;
        // Room for two records per file.
        let cfg = config(dir.path(), line_len * 2 + 4);
        let mut trace = DecisionTrace::open(&cfg).unwrap();
        for i in 0..20 {
            trace.append(&record(i)).unwrap();
        }

        for n in 1..=3 {
            assert!(DecisionTrace::archive_path(&cfg.path, n).exists(), ".{n} missing");
        }
        assert!(!DecisionTrace::archive_path(&cfg.path, 4).exists());
        for path in [
            cfg.path.clone(),
            DecisionTrace::archive_path(&cfg.path, 1),
        ] {
            assert!(fs::metadata(&path).unwrap().len() <= cfg.max_bytes);
        }

        // .1 holds the records just before the current file.
        let newest_archive = read_records(&DecisionTrace::archive_path(&cfg.path, 1)).unwrap();
        assert_eq!(newest_archive.last().unwrap().prompt_id.as_str(), "prm-17");
    }

    #[test]
    fn oversized_archive_count_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let line_len = serde_json::to_vec(&record(0)).unwrap().len() as u64 + 1;
        let cfg = TraceConfig {
            max_archives: 10,
            ..config(dir.path(), line_len + 4)
        };
        let mut trace = DecisionTrace::open(&cfg).unwrap();
        for i in 0..20 {
            trace.append(&record(i)).unwrap();
        }

        assert!(DecisionTrace::archive_path(&cfg.path, MAX_TRACE_ARCHIVES).exists());
        for n in MAX_TRACE_ARCHIVES + 1..=10 {
            assert!(!DecisionTrace::archive_path(&cfg.path, n).exists(), ".{n} kept");
        }
    }

    #[test]
    fn tail_reaches_into_newest_archive() {
        let dir = tempfile::tempdir().unwrap();
        let line_len = serde_json::to_vec(&record(0)).unwrap().len() as u64 + 1;
        let cfg = config(dir.path(), line_len * 2 + 4);
        let mut trace = DecisionTrace::open(&cfg).unwrap();
        for i in 0..5 {
            trace.append(&record(i)).unwrap();
        }
        // current holds prm-4 only; .1 holds prm-2, prm-3
        let tail = read_tail(&cfg.path, 3).unwrap();
        let ids: Vec<_> = tail.iter().map(|r| r.prompt_id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["prm-2", "prm-3", "prm-4"]);
    }

    #[test]
    fn read_tail_tolerates_missing_file_and_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");
        assert!(read_tail(&path, 10).unwrap().is_empty());

        let mut content = serde_json::to_vec(&record(1)).unwrap();
        content.extend_from_slice(b"\n{\"timestamp\":\"2026-");
        fs::write(&path, content).unwrap();
        let tail = read_tail(&path, 10).unwrap();
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn reopen_continues_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1024 * 1024);
        {
            let mut trace = DecisionTrace::open(&cfg).unwrap();
            trace.append(&record(0)).unwrap();
        }
        let mut trace = DecisionTrace::open(&cfg).unwrap();
        trace.record(&record(1));
        assert_eq!(read_tail(&cfg.path, 10).unwrap().len(), 2);
    }
}
