//! Scenario: one order's trouble never spoils the batch.
//!
//! # Invariant under test
//! A storage failure on one order, a deferred order and an unusable verdict
//! all leave their own rows untouched while the rest of the page is applied.
//! An empty pending set is a no-op cycle that never calls the authority.

use std::sync::Arc;

use loyal_accrual::{GatewayError, Verdict};
use loyal_db::LoyaltyStore;
use loyal_reconcile::{CycleOutcome, CycleReport, ReconcileConfig, ReconcileWorker};
use loyal_schemas::{OrderStatus, Points, UserId};
use loyal_testkit::{MemStore, ScriptedGateway};
use tokio_util::sync::CancellationToken;

const USER: UserId = UserId(31);

async fn cycle(worker: &ReconcileWorker) -> CycleReport {
    match worker.run_cycle(&CancellationToken::new()).await.unwrap() {
        CycleOutcome::Completed(r) => r,
        CycleOutcome::Skipped => panic!("cycle unexpectedly skipped"),
    }
}

#[tokio::test(start_paused = true)]
async fn empty_pending_set_is_a_noop() {
    let store = Arc::new(MemStore::new());
    let gw = Arc::new(ScriptedGateway::new());
    let worker = ReconcileWorker::new(store.clone(), gw.clone(), ReconcileConfig::default());

    let report = cycle(&worker).await;
    assert!(report.is_empty());
    assert_eq!(report, CycleReport::default());
    assert_eq!(gw.total_calls(), 0);
    assert_eq!(store.apply_calls().await, 0);
}

#[tokio::test(start_paused = true)]
async fn failures_are_isolated_per_order() {
    let store = Arc::new(MemStore::new());
    let gw = Arc::new(ScriptedGateway::new());
    let [ok, broken_store, down, bad_body, invalid] = [
        loyal_testkit::order_number(501).unwrap(),
        loyal_testkit::order_number(502).unwrap(),
        loyal_testkit::order_number(503).unwrap(),
        loyal_testkit::order_number(504).unwrap(),
        loyal_testkit::order_number(505).unwrap(),
    ];
    for n in [&ok, &broken_store, &down, &bad_body, &invalid] {
        store.seed_order(USER, n, OrderStatus::New, None).await.unwrap();
    }
    gw.script(&ok, [Ok(Verdict::Processed(Points::whole(100)))]);
    gw.script(&broken_store, [Ok(Verdict::Processed(Points::whole(40)))]);
    gw.script(&down, [Err(GatewayError::Server { status: 500 })]);
    gw.script(
        &bad_body,
        [Err(GatewayError::Protocol("PROCESSED without accrual".into()))],
    );
    gw.script(&invalid, [Ok(Verdict::Invalid)]);
    store.fail_next_apply(&broken_store).await;

    let worker = ReconcileWorker::new(store.clone(), gw.clone(), ReconcileConfig::default());
    let report = cycle(&worker).await;

    assert_eq!(report.selected, 5);
    assert_eq!(report.processed, 1);
    assert_eq!(report.invalid, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.failed, 1, "only the storage failure counts as failed");
    assert_eq!(report.advanced, 1, "acknowledged but unusable verdict advances");
    assert_eq!(report.credited, Points::whole(100));

    let status = |o: Option<loyal_schemas::Order>| o.map(|o| (o.status, o.accrual));
    assert_eq!(
        status(store.order(&ok).await.unwrap()),
        Some((OrderStatus::Processed, Some(Points::whole(100))))
    );
    assert_eq!(
        status(store.order(&invalid).await.unwrap()),
        Some((OrderStatus::Invalid, None))
    );
    assert_eq!(
        status(store.order(&broken_store).await.unwrap()),
        Some((OrderStatus::New, None)),
        "failed apply must not leave a partial write"
    );
    assert_eq!(
        status(store.order(&down).await.unwrap()),
        Some((OrderStatus::New, None))
    );
    assert_eq!(
        status(store.order(&bad_body).await.unwrap()),
        Some((OrderStatus::Processing, None)),
        "known upstream but unusable: advanced, never terminal"
    );
    assert_eq!(store.balance(USER).await.unwrap().current, Points::whole(100));

    // Storage recovered; the failed order completes on the next cycle.
    let report = cycle(&worker).await;
    assert_eq!(report.processed, 1);
    assert_eq!(report.credited, Points::whole(40));
    assert_eq!(store.balance(USER).await.unwrap().current, Points::whole(140));
}

#[tokio::test(start_paused = true)]
async fn rejected_request_is_not_retried_within_cycle() {
    let store = Arc::new(MemStore::new());
    let gw = Arc::new(ScriptedGateway::new());
    let n = loyal_testkit::order_number(600).unwrap();
    store.seed_order(USER, &n, OrderStatus::New, None).await.unwrap();
    gw.script(&n, [Err(GatewayError::Rejected { status: 400 })]);

    let worker = ReconcileWorker::new(store.clone(), gw.clone(), ReconcileConfig::default());
    let report = cycle(&worker).await;

    assert_eq!(report.failed, 1);
    assert_eq!(gw.calls_for(&n).len(), 1);
    let order = store.order(&n).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::New);

    // Still eligible: the next cycle asks again.
    cycle(&worker).await;
    assert_eq!(gw.calls_for(&n).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn processing_verdict_advances_new_orders_only() {
    let store = Arc::new(MemStore::new());
    let gw = Arc::new(ScriptedGateway::new());
    let fresh = loyal_testkit::order_number(700).unwrap();
    let seen = loyal_testkit::order_number(701).unwrap();
    store.seed_order(USER, &fresh, OrderStatus::New, None).await.unwrap();
    store
        .seed_order(USER, &seen, OrderStatus::Processing, None)
        .await
        .unwrap();
    gw.script(&fresh, [Ok(Verdict::Processing)]);
    gw.script(&seen, [Ok(Verdict::Processing)]);

    let worker = ReconcileWorker::new(store.clone(), gw.clone(), ReconcileConfig::default());
    let report = cycle(&worker).await;

    assert_eq!(report.advanced, 1);
    assert_eq!(report.unchanged, 1);
    for n in [&fresh, &seen] {
        let o = store.order(n).await.unwrap().unwrap();
        assert_eq!(o.status, OrderStatus::Processing);
    }
    // No terminal write was attempted.
    assert_eq!(store.apply_calls().await, 0);
}
