use std::time::Duration;

use loyal_accrual::BackoffPolicy;
use loyal_config::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub poll_interval: Duration,
    pub page_size: u32,
    pub max_pages_per_cycle: u32,
    /// Orders in flight at once within a page.
    pub concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            page_size: 100,
            max_pages_per_cycle: 10,
            concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ReconcileConfig {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            poll_interval: s.reconcile.poll_interval(),
            page_size: s.reconcile.page_size,
            max_pages_per_cycle: s.reconcile.max_pages_per_cycle,
            concurrency: s.reconcile.concurrency,
            backoff: BackoffPolicy::new(
                s.backoff.base_delay(),
                s.backoff.max_delay(),
                s.backoff.max_attempts,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_default_config() {
        assert_eq!(
            ReconcileConfig::from_settings(&Settings::default()),
            ReconcileConfig::default()
        );
    }
}
