//! Settings resolution and tracing setup for the daemon binary.
//!
//! Precedence, highest first: CLI flags, environment, YAML layers, defaults.

use anyhow::{Context, Result};
use loyal_config::{LogFormat, LogSettings, Overrides, Settings};
use tracing_subscriber::EnvFilter;

/// Effective settings plus the hash of the YAML layers they came from.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub settings: Settings,
    pub config_hash: Option<String>,
}

/// Merge `config_paths` (may be empty), then apply `flags` over `env`.
pub fn resolve_settings(
    config_paths: &[String],
    flags: Overrides,
    env: Overrides,
) -> Result<Resolved> {
    let (mut settings, config_hash) = if config_paths.is_empty() {
        (Settings::default(), None)
    } else {
        let paths: Vec<&str> = config_paths.iter().map(String::as_str).collect();
        let loaded = loyal_config::load_layered_yaml(&paths)?;
        (loaded.settings()?, Some(loaded.config_hash))
    };

    settings.apply(&flags.or(env));
    settings.validate()?;
    Ok(Resolved {
        settings,
        config_hash,
    })
}

/// `RUST_LOG` wins over `log.filter`.
pub fn init_tracing(log: &LogSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.filter))
        .with_context(|| format!("invalid log filter: {}", log.filter))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match log.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))
}
