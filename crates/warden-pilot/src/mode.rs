//! Engine mode: the shared kill switch and its on-disk state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use warden_types::{EngineMode, WardenError};

/// Cheaply cloneable view of the engine mode.
///
/// The executor and router read it immediately before injecting, so a
/// stop takes effect without waiting for the engine to be consulted.
#[derive(Debug, Clone)]
pub struct ModeHandle(Arc<AtomicU8>);

impl ModeHandle {
    pub fn new(mode: EngineMode) -> Self {
        Self(Arc::new(AtomicU8::new(encode(mode))))
    }

    pub fn get(&self) -> EngineMode {
        decode(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, mode: EngineMode) {
        self.0.store(encode(mode), Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.get() == EngineMode::Stopped
    }
}

impl Default for ModeHandle {
    fn default() -> Self {
        Self::new(EngineMode::Running)
    }
}

fn encode(mode: EngineMode) -> u8 {
    match mode {
        EngineMode::Running => 0,
        EngineMode::Paused => 1,
        EngineMode::Stopped => 2,
    }
}

fn decode(value: u8) -> EngineMode {
    match value {
        0 => EngineMode::Running,
        1 => EngineMode::Paused,
        _ => EngineMode::Stopped,
    }
}

/// Persisted engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    pub mode: EngineMode,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// JSON file holding the [`EngineState`], written atomically.
#[derive(Debug, Clone)]
pub struct EngineStateStore {
    path: PathBuf,
}

impl EngineStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save state to disk atomically (write tmp, then rename).
    pub fn save(&self, state: &EngineState) -> Result<(), WardenError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    WardenError::PersistenceError(format!("failed to create state dir: {e}"))
                })?;
            }
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| WardenError::PersistenceError(format!("failed to serialize state: {e}")))?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)
            .map_err(|e| WardenError::PersistenceError(format!("failed to write state tmp: {e}")))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| WardenError::PersistenceError(format!("failed to rename state file: {e}")))?;
        Ok(())
    }

    /// Load the saved state. A missing file is `None`; an unreadable one is
    /// logged and treated as PAUSED so a corrupt file never enables autopilot.
    pub fn load(&self) -> Option<EngineState> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable engine state, pausing");
                Some(EngineState {
                    mode: EngineMode::Paused,
                    updated_at: Utc::now(),
                    reason: Some("unreadable state file".into()),
                })
            }
        }
    }

    /// Saved mode, or RUNNING when nothing was ever saved.
    pub fn load_mode(&self) -> EngineMode {
        self.load().map(|s| s.mode).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_clones_share_state() {
        let handle = ModeHandle::default();
        let other = handle.clone();
        other.set(EngineMode::Stopped);
        assert!(handle.is_stopped());
        handle.set(EngineMode::Paused);
        assert_eq!(other.get(), EngineMode::Paused);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EngineStateStore::new(tmp.path().join("engine_state.json"));
        assert!(store.load().is_none());
        assert_eq!(store.load_mode(), EngineMode::Running);

        let state = EngineState {
            mode: EngineMode::Stopped,
            updated_at: Utc::now(),
            reason: Some("operator".into()),
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_state_loads_as_paused() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EngineStateStore::new(tmp.path().join("engine_state.json"));
        std::fs::write(store.path(), "{not json").unwrap();
        assert_eq!(store.load_mode(), EngineMode::Paused);
    }
}
