//! Command handler modules for loyal-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod reconcile;

use anyhow::{Context, Result};
use loyal_config::{Overrides, Settings};

/// Settings from optional YAML layers, then env, then `flags`.
pub fn resolve_settings(config_paths: &[String], flags: Overrides) -> Result<Settings> {
    let mut settings = if config_paths.is_empty() {
        Settings::default()
    } else {
        let refs: Vec<&str> = config_paths.iter().map(String::as_str).collect();
        loyal_config::load_layered_yaml(&refs)?.settings()?
    };
    settings.apply(&flags.or(Overrides::from_env()));
    settings.validate()?;
    Ok(settings)
}

/// `DATABASE_URI`, else `LOYAL_DATABASE_URL`.
pub fn database_url_from_env() -> Result<String> {
    Overrides::from_env().database_url.with_context(|| {
        format!(
            "missing database url: set {} or {}",
            loyal_config::ENV_DATABASE_URI,
            loyal_config::ENV_LOYAL_DATABASE_URL
        )
    })
}
