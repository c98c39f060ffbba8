//! Typed settings on top of the merged config document.
//!
//! Precedence, highest first: CLI flags, environment, YAML layers, defaults.
//! The merged YAML is deserialised with every field defaulted; then
//! [`Overrides`] from flags and env are applied; then [`Settings::validate`]
//! runs once before anything is started.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    /// `host:port` the HTTP API binds to. Host names are resolved at bind.
    pub addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccrualSettings {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for AccrualSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

impl AccrualSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileSettings {
    pub poll_interval_ms: u64,
    pub page_size: u32,
    pub max_pages_per_cycle: u32,
    pub concurrency: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            page_size: 100,
            max_pages_per_cycle: 10,
            concurrency: 4,
        }
    }
}

impl ReconcileSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            max_attempts: 3,
        }
    }
}

impl BackoffSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Database URL (never in YAML)
// ---------------------------------------------------------------------------

/// Postgres connection string. Redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseUrl(String);

impl DatabaseUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for DatabaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DatabaseUrl(<REDACTED>)")
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub server: ServerSettings,
    pub accrual: AccrualSettings,
    pub reconcile: ReconcileSettings,
    pub backoff: BackoffSettings,
    pub shutdown_grace_ms: u64,
    pub log: LogSettings,
    #[serde(skip)]
    pub database_url: Option<DatabaseUrl>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            accrual: AccrualSettings::default(),
            reconcile: ReconcileSettings::default(),
            backoff: BackoffSettings::default(),
            shutdown_grace_ms: 10_000,
            log: LogSettings::default(),
            database_url: None,
        }
    }
}

impl Settings {
    pub fn from_json(v: &Value) -> Result<Self> {
        Settings::deserialize(v).context("config does not match settings schema")
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Apply flag/env overrides. `None` fields leave the current value alone.
    pub fn apply(&mut self, ov: &Overrides) {
        if let Some(addr) = &ov.run_address {
            self.server.addr = addr.clone();
        }
        if let Some(url) = &ov.accrual_address {
            self.accrual.base_url = url.clone();
        }
        if let Some(db) = &ov.database_url {
            self.database_url = Some(DatabaseUrl::new(db.clone()));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.addr.trim().is_empty() {
            bail!("CONFIG_INVALID server.addr must not be empty");
        }
        if self.accrual.base_url.trim().is_empty() {
            bail!("CONFIG_INVALID accrual.base_url must not be empty");
        }
        if self.accrual.request_timeout_ms == 0 {
            bail!("CONFIG_INVALID accrual.request_timeout_ms must be > 0");
        }
        if self.reconcile.poll_interval_ms == 0 {
            bail!("CONFIG_INVALID reconcile.poll_interval_ms must be > 0");
        }
        if self.reconcile.page_size == 0 {
            bail!("CONFIG_INVALID reconcile.page_size must be > 0");
        }
        if self.reconcile.max_pages_per_cycle == 0 {
            bail!("CONFIG_INVALID reconcile.max_pages_per_cycle must be > 0");
        }
        if self.reconcile.concurrency == 0 {
            bail!("CONFIG_INVALID reconcile.concurrency must be > 0");
        }
        if self.backoff.max_attempts == 0 {
            bail!("CONFIG_INVALID backoff.max_attempts must be > 0");
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            bail!(
                "CONFIG_INVALID backoff.base_delay_ms ({}) exceeds backoff.max_delay_ms ({})",
                self.backoff.base_delay_ms,
                self.backoff.max_delay_ms
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

pub const ENV_RUN_ADDRESS: &str = "RUN_ADDRESS";
pub const ENV_DATABASE_URI: &str = "DATABASE_URI";
pub const ENV_ACCRUAL_SYSTEM_ADDRESS: &str = "ACCRUAL_SYSTEM_ADDRESS";
pub const ENV_LOYAL_DATABASE_URL: &str = "LOYAL_DATABASE_URL";

/// Values that sit above YAML: CLI flags and environment variables.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub run_address: Option<String>,
    pub database_url: Option<String>,
    pub accrual_address: Option<String>,
}

impl std::fmt::Debug for Overrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overrides")
            .field("run_address", &self.run_address)
            .field("database_url", &self.database_url.as_ref().map(|_| "<REDACTED>"))
            .field("accrual_address", &self.accrual_address)
            .finish()
    }
}

impl Overrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    /// `DATABASE_URI` wins over `LOYAL_DATABASE_URL` when both are set.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            run_address: get(ENV_RUN_ADDRESS),
            database_url: get(ENV_DATABASE_URI).or_else(|| get(ENV_LOYAL_DATABASE_URL)),
            accrual_address: get(ENV_ACCRUAL_SYSTEM_ADDRESS),
        }
    }

    /// Field-wise fallback: values in `self` win, gaps are filled from `lower`.
    pub fn or(self, lower: Overrides) -> Overrides {
        Overrides {
            run_address: self.run_address.or(lower.run_address),
            database_url: self.database_url.or(lower.database_url),
            accrual_address: self.accrual_address.or(lower.accrual_address),
        }
    }
}
