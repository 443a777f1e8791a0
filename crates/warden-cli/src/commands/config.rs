//! Locating and loading `warden.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::debug;

use warden_types::{WardenConfig, CONFIG_FILENAME};

/// Environment variable naming the Warden home directory.
pub const HOME_ENV: &str = "WARDEN_HOME";

/// Resolve the config path: `--config`, then `$WARDEN_HOME/warden.toml`,
/// then `./warden.toml`.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var_os(HOME_ENV) {
        Some(home) => PathBuf::from(home).join(CONFIG_FILENAME),
        None => PathBuf::from(CONFIG_FILENAME),
    }
}

/// Load the config, or fall back to defaults rooted next to where the file
/// would be.
pub fn load_config(explicit: Option<&Path>) -> Result<WardenConfig> {
    let path = config_path(explicit);
    if path.exists() {
        return WardenConfig::load(&path)
            .with_context(|| format!("failed to load {}", path.display()));
    }
    if explicit.is_some() {
        anyhow::bail!("config file not found: {}", path.display());
    }
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    debug!(base = %base.display(), "no config file, using defaults");
    Ok(WardenConfig::default_for(base))
}

/// Parse a snake_case enum name (`yes_no`, `high`, ...) through serde.
pub fn parse_name<T: DeserializeOwned>(value: &str, what: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .with_context(|| format!("invalid {what}: {value:?}"))
}
