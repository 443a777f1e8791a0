//! `warden init`: write a starter config and policy.

use std::path::Path;

use anyhow::{bail, Context, Result};

use warden_policy::builtin::get_builtin_policy;
use warden_types::{WardenConfig, CONFIG_FILENAME};

/// Write `warden.toml` and `policy.toml` into `dir`.
pub fn run(dir: &Path, template: &str, force: bool) -> Result<()> {
    let policy_text = get_builtin_policy(template).with_context(|| {
        format!(
            "unknown policy template '{template}'; available: {}",
            warden_policy::builtin::list_builtin_policies().join(", ")
        )
    })?;

    let config = WardenConfig::default_for(dir);
    let config_path = dir.join(CONFIG_FILENAME);
    for path in [&config_path, &config.policy_path] {
        if path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    std::fs::write(&config_path, config.to_toml()?)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    std::fs::write(&config.policy_path, policy_text.trim_start())
        .with_context(|| format!("failed to write {}", config.policy_path.display()))?;

    println!("Wrote {}", config_path.display());
    println!("Wrote {} (template: {template})", config.policy_path.display());
    Ok(())
}
