//! `loyal-cli reconcile once`: a single worker cycle, outside the daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use loyal_accrual::HttpAccrualClient;
use loyal_config::{Overrides, Settings};
use loyal_db::PgStore;
use loyal_reconcile::{CycleOutcome, ReconcileConfig, ReconcileWorker};
use tokio_util::sync::CancellationToken;

pub async fn run_once(settings: &Settings, database_url: &str) -> Result<()> {
    let pool = loyal_db::connect(database_url).await?;
    let store = Arc::new(PgStore::new(pool));
    let gateway = HttpAccrualClient::new(
        settings.accrual.base_url.clone(),
        settings.accrual.request_timeout(),
    )
    .context("failed to build accrual http client")?;

    let worker = ReconcileWorker::new(
        store,
        Arc::new(gateway),
        ReconcileConfig::from_settings(settings),
    );

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let outcome = worker.run_cycle(&cancel).await;
    ctrl_c.abort();

    match outcome? {
        CycleOutcome::Completed(r) => {
            println!("selected={}", r.selected);
            println!("processed={}", r.processed);
            println!("invalid={}", r.invalid);
            println!("advanced={}", r.advanced);
            println!("unchanged={}", r.unchanged);
            println!("deferred={}", r.deferred);
            println!("waiting={}", r.waiting);
            println!("failed={}", r.failed);
            println!("credited={}", r.credited);
        }
        CycleOutcome::Skipped => println!("skipped=true"),
    }
    Ok(())
}

/// Flag overrides for `reconcile once`; only the accrual address applies.
pub fn flags(accrual_address: Option<String>) -> Overrides {
    Overrides {
        accrual_address,
        ..Overrides::default()
    }
}
