//! Configuration for a Warden governance instance.
//!
//! [`WardenConfig`] is loaded from `warden.toml` and controls where the
//! audit chain and decision trace live, router timing, rate limits, the
//! reply identity allow-list, redaction, and which channel to use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::WardenError;

/// Default config file name.
pub const CONFIG_FILENAME: &str = "warden.toml";

/// Default audit chain database file name.
pub const LEDGER_FILENAME: &str = "audit.db";

/// Default decision trace file name.
pub const TRACE_FILENAME: &str = "decisions.jsonl";

/// Default engine state file name.
pub const ENGINE_STATE_FILENAME: &str = "engine_state.json";

/// Default decision trace rotation threshold (10 MiB).
pub const DEFAULT_TRACE_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Default number of rotated trace archives kept.
pub const DEFAULT_TRACE_MAX_ARCHIVES: usize = 3;

/// Upper bound on rotated trace archives. Larger configured values are
/// clamped to this.
pub const MAX_TRACE_ARCHIVES: usize = 3;

/// Decision trace settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceConfig {
    pub path: PathBuf,
    #[serde(default = "default_trace_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_trace_max_archives")]
    pub max_archives: usize,
}

fn default_trace_max_bytes() -> u64 {
    DEFAULT_TRACE_MAX_BYTES
}

fn default_trace_max_archives() -> usize {
    DEFAULT_TRACE_MAX_ARCHIVES
}

/// Prompt router timing and mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterConfig {
    /// TTL applied when a prompt does not carry its own.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// How often the TTL sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Never dispatch to channels and never inject.
    #[serde(default)]
    pub dry_run: bool,
    /// How many reply nonces are remembered for duplicate suppression.
    #[serde(default = "default_nonce_capacity")]
    pub nonce_capacity: usize,
}

fn default_ttl_secs() -> u64 {
    crate::prompt::DEFAULT_TTL_SECONDS
}

fn default_sweep_interval_secs() -> u64 {
    5
}

fn default_nonce_capacity() -> usize {
    10_000
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            dry_run: false,
            nonce_capacity: default_nonce_capacity(),
        }
    }
}

/// Per (channel, user) token bucket settings. Zero values are rejected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Burst capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Tokens refilled per minute.
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
}

fn default_burst() -> u32 {
    5
}

fn default_per_minute() -> u32 {
    30
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: default_burst(),
            per_minute: default_per_minute(),
        }
    }
}

/// A custom redaction pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedactionPattern {
    pub pattern: String,
    pub replacement: String,
}

/// Excerpt redaction settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedactionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub custom_patterns: Vec<RedactionPattern>,
}

fn default_true() -> bool {
    true
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            custom_patterns: Vec::new(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WardenConfig {
    /// Path to the SQLite audit chain.
    pub ledger_path: PathBuf,
    /// Path to the TOML policy file.
    pub policy_path: PathBuf,
    /// Where the autopilot engine mode is persisted.
    pub engine_state_path: PathBuf,
    /// Identities (`channel:user`) allowed to answer every session.
    #[serde(default)]
    pub allowed_identities: Vec<String>,
    /// Built-in channel name, looked up in the channel registry.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// How long terminal sessions are retained in memory, in seconds.
    #[serde(default = "default_session_retention_secs")]
    pub session_retention_secs: u64,
    /// Maximum mismatches listed in a verification report.
    #[serde(default = "default_max_reported_errors")]
    pub max_reported_errors: usize,
    pub trace: TraceConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
}

fn default_channel() -> String {
    "log".to_string()
}

fn default_session_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_reported_errors() -> usize {
    50
}

impl WardenConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, WardenError> {
        toml::from_str(content).map_err(|e| WardenError::ConfigError(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, WardenError> {
        toml::to_string_pretty(self).map_err(|e| WardenError::ConfigError(e.to_string()))
    }

    /// Load and parse a config file.
    pub fn load(path: &Path) -> Result<Self, WardenError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WardenError::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Default configuration rooted at `base_dir`.
    pub fn default_for(base_dir: &Path) -> Self {
        Self {
            ledger_path: base_dir.join(LEDGER_FILENAME),
            policy_path: base_dir.join("policy.toml"),
            engine_state_path: base_dir.join(ENGINE_STATE_FILENAME),
            trace: TraceConfig {
                path: base_dir.join(TRACE_FILENAME),
                max_bytes: DEFAULT_TRACE_MAX_BYTES,
                max_archives: DEFAULT_TRACE_MAX_ARCHIVES,
            },
            router: RouterConfig::default(),
            rate_limit: RateLimitConfig::default(),
            redaction: RedactionConfig::default(),
            allowed_identities: Vec::new(),
            channel: default_channel(),
            session_retention_secs: default_session_retention_secs(),
            max_reported_errors: default_max_reported_errors(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_toml_roundtrip() {
        let mut config = WardenConfig::default_for(Path::new("/var/lib/warden"));
        config.allowed_identities.push("telegram:42".into());
        config.router.dry_run = true;

        let toml_str = config.to_toml().unwrap();
        let parsed = WardenConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let parsed = WardenConfig::from_toml(
            r#"
ledger_path = "/tmp/audit.db"
policy_path = "/tmp/policy.toml"
engine_state_path = "/tmp/engine.json"

[trace]
path = "/tmp/decisions.jsonl"
"#,
        )
        .unwrap();
        assert_eq!(parsed.trace.max_bytes, 10 * 1024 * 1024);
        assert_eq!(parsed.trace.max_archives, 3);
        assert_eq!(parsed.router.default_ttl_secs, 300);
        assert_eq!(parsed.channel, "log");
        assert!(parsed.redaction.enabled);
        assert!(!parsed.router.dry_run);
    }

    #[test]
    fn default_for_places_files_under_base_dir() {
        let base = PathBuf::from("/home/user/.warden");
        let config = WardenConfig::default_for(&base);
        assert_eq!(config.ledger_path, base.join("audit.db"));
        assert_eq!(config.trace.path, base.join("decisions.jsonl"));
    }

    #[test]
    fn malformed_config_is_config_error() {
        assert!(matches!(
            WardenConfig::from_toml("ledger_path = 3"),
            Err(WardenError::ConfigError(_))
        ));
    }
}
