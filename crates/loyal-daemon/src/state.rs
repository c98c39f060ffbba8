//! Shared runtime state for loyal-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The reconciliation
//! worker is not reachable from here; it shares only the store.

use loyal_ledger::LoyaltyService;
use serde::{Deserialize, Serialize};

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            service: "loyal-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    pub service: LoyaltyService,
}

impl AppState {
    pub fn new(service: LoyaltyService) -> Self {
        Self {
            build: BuildInfo::current(),
            service,
        }
    }
}
