//! Scenario: cycle scheduling and fan-out.
//!
//! # Invariant under test
//! - Cycles never overlap: a cycle requested while one runs is `Skipped`.
//! - In-flight gateway calls never exceed `concurrency`.
//! - Pages are walked oldest first up to `max_pages_per_cycle`.
//! - Cancelling the worker interrupts backoff sleeps and `run` returns
//!   without waiting out a retry hint short enough to be slept inline.

use std::sync::Arc;
use std::time::Duration;

use loyal_accrual::{BackoffPolicy, GatewayError, Verdict};
use loyal_db::LoyaltyStore;
use loyal_reconcile::{CycleOutcome, ReconcileConfig, ReconcileWorker};
use loyal_schemas::{OrderStatus, Points, UserId};
use loyal_testkit::{MemStore, ScriptedGateway};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const USER: UserId = UserId(41);

async fn seeded(count: usize, verdict: Verdict, gw: &ScriptedGateway) -> Arc<MemStore> {
    let store = Arc::new(MemStore::new());
    for n in loyal_testkit::order_numbers(800, count).unwrap() {
        store.seed_order(USER, &n, OrderStatus::New, None).await.unwrap();
        gw.script(&n, [Ok(verdict)]);
    }
    store
}

#[tokio::test(start_paused = true)]
async fn concurrent_cycle_request_is_skipped() {
    let gw = Arc::new(ScriptedGateway::new().with_latency(Duration::from_secs(5)));
    let store = seeded(2, Verdict::Invalid, &gw).await;
    let worker = Arc::new(ReconcileWorker::new(
        store.clone(),
        gw.clone(),
        ReconcileConfig::default(),
    ));
    let cancel = CancellationToken::new();

    let running = {
        let worker = worker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run_cycle(&cancel).await })
    };
    // Let the first cycle take the guard and park on gateway latency.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = worker.run_cycle(&cancel).await.unwrap();
    assert_eq!(second, CycleOutcome::Skipped);

    let CycleOutcome::Completed(first) = running.await.unwrap().unwrap() else {
        panic!("first cycle must complete");
    };
    assert_eq!(first.invalid, 2);
    assert_eq!(gw.total_calls(), 2, "skipped cycle made no calls");
}

#[tokio::test(start_paused = true)]
async fn in_flight_calls_bounded_by_concurrency() {
    let gw = Arc::new(ScriptedGateway::new().with_latency(Duration::from_millis(100)));
    let store = seeded(20, Verdict::Processed(Points::whole(1)), &gw).await;
    let cfg = ReconcileConfig {
        concurrency: 4,
        ..ReconcileConfig::default()
    };
    let worker = ReconcileWorker::new(store.clone(), gw.clone(), cfg);

    let started = Instant::now();
    let CycleOutcome::Completed(report) = worker.run_cycle(&CancellationToken::new()).await.unwrap()
    else {
        panic!("cycle skipped");
    };

    assert_eq!(report.processed, 20);
    assert_eq!(gw.max_in_flight(), 4);
    // 20 calls of 100ms, four at a time.
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(store.balance(USER).await.unwrap().current, Points::whole(20));
}

#[tokio::test(start_paused = true)]
async fn pages_are_bounded_per_cycle() {
    let gw = Arc::new(ScriptedGateway::new());
    let store = seeded(5, Verdict::Invalid, &gw).await;
    let cfg = ReconcileConfig {
        page_size: 2,
        max_pages_per_cycle: 2,
        ..ReconcileConfig::default()
    };
    let worker = ReconcileWorker::new(store.clone(), gw.clone(), cfg);
    let cancel = CancellationToken::new();

    let CycleOutcome::Completed(r) = worker.run_cycle(&cancel).await.unwrap() else {
        panic!("cycle skipped");
    };
    assert_eq!(r.invalid, 4);

    // The oldest four went first; the youngest is left for the next cycle.
    let pending = store.pending_orders(None, 10).await.unwrap();
    let youngest = loyal_testkit::order_number(804).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].number, youngest);

    let CycleOutcome::Completed(r) = worker.run_cycle(&cancel).await.unwrap() else {
        panic!("cycle skipped");
    };
    assert_eq!(r.invalid, 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_backoff_and_stops_worker() {
    let gw = Arc::new(ScriptedGateway::new());
    let store = Arc::new(MemStore::new());
    let n = loyal_testkit::order_number(900).unwrap();
    store.seed_order(USER, &n, OrderStatus::New, None).await.unwrap();
    gw.script(
        &n,
        [Err(GatewayError::RateLimited {
            retry_after: Some(Duration::from_secs(4)),
        })],
    );

    let cfg = ReconcileConfig {
        poll_interval: Duration::from_secs(1),
        backoff: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(5), 3),
        ..ReconcileConfig::default()
    };
    let worker = Arc::new(ReconcileWorker::new(store.clone(), gw.clone(), cfg));
    let cancel = CancellationToken::new();
    let started = Instant::now();
    let handle = worker.spawn(cancel.clone());

    // First tick fires immediately; the order is now sleeping on the hint.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gw.calls_for(&n).len(), 1);

    cancel.cancel();
    handle.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(gw.calls_for(&n).len(), 1);
    let order = store.order(&n).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::New);
}

#[tokio::test(start_paused = true)]
async fn run_loop_picks_up_late_submissions() {
    let gw = Arc::new(ScriptedGateway::new());
    let store = Arc::new(MemStore::new());
    let cfg = ReconcileConfig {
        poll_interval: Duration::from_secs(1),
        ..ReconcileConfig::default()
    };
    let worker = Arc::new(ReconcileWorker::new(store.clone(), gw.clone(), cfg));
    let cancel = CancellationToken::new();
    let handle = worker.spawn(cancel.clone());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let n = loyal_testkit::order_number(950).unwrap();
    store.seed_order(USER, &n, OrderStatus::New, None).await.unwrap();
    gw.script(&n, [Ok(Verdict::Processed(Points::whole(9)))]);

    tokio::time::sleep(Duration::from_secs(2)).await;
    cancel.cancel();
    handle.await.unwrap();

    let order = store.order(&n).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Processed);
    assert_eq!(store.balance(USER).await.unwrap().current, Points::whole(9));
}
