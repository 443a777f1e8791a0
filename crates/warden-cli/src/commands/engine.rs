//! `warden engine`: inspect and change the persisted autopilot mode.
//!
//! These commands edit the engine state file. A running service reads it
//! at startup; a live service is switched through its command channel.

use anyhow::{Context, Result};
use chrono::Utc;

use warden_pilot::{EngineState, EngineStateStore};
use warden_types::{EngineMode, WardenConfig};

pub fn status(config: &WardenConfig) -> Result<()> {
    let store = EngineStateStore::new(&config.engine_state_path);
    match store.load() {
        Some(state) => {
            println!("Engine mode: {}", state.mode);
            println!("Updated:     {}", state.updated_at.to_rfc3339());
            if let Some(reason) = state.reason {
                println!("Reason:      {reason}");
            }
        }
        None => println!("Engine mode: {} (no saved state)", EngineMode::default()),
    }
    Ok(())
}

/// Persist `mode`. Returns the mode that was saved before.
pub fn set(config: &WardenConfig, mode: EngineMode, reason: Option<String>) -> Result<EngineMode> {
    let store = EngineStateStore::new(&config.engine_state_path);
    let previous = store.load_mode();
    store
        .save(&EngineState {
            mode,
            updated_at: Utc::now(),
            reason: Some(reason.unwrap_or_else(|| "set from cli".into())),
        })
        .with_context(|| format!("failed to write {}", store.path().display()))?;
    println!("Engine mode: {previous} -> {mode}");
    Ok(previous)
}
