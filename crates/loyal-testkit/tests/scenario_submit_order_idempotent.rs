//! Scenario: order submission through the core API.
//!
//! # Invariant under test
//! - Same user, same number, twice: the same order both times, one row.
//! - Different user, same number: `Conflict`.
//! - Checksum failures are `InvalidFormat` and write nothing.

use std::sync::Arc;

use loyal_ledger::{LoyaltyService, ServiceError, SubmitResult};
use loyal_schemas::{OrderStatus, UserId};
use loyal_testkit::MemStore;

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);

#[tokio::test]
async fn same_user_resubmission_returns_same_order() {
    let svc = LoyaltyService::new(Arc::new(MemStore::new()));

    let first = svc.submit_order(ALICE, "79927398713").await.unwrap();
    let SubmitResult::Accepted(order) = first else {
        panic!("first submission must be accepted, got {first:?}");
    };
    assert_eq!(order.status, OrderStatus::New);
    assert_eq!(order.owner, ALICE);

    let second = svc.submit_order(ALICE, "79927398713\n").await.unwrap();
    assert_eq!(second, SubmitResult::AlreadyUploaded(order.clone()));
    assert_eq!(second.order(), &order);

    assert_eq!(svc.orders(ALICE).await.unwrap(), vec![order]);
}

#[tokio::test]
async fn other_user_gets_conflict() {
    let svc = LoyaltyService::new(Arc::new(MemStore::new()));
    svc.submit_order(ALICE, "12345678903").await.unwrap();

    let err = svc.submit_order(BOB, "12345678903").await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict), "{err:?}");
    assert!(svc.orders(BOB).await.unwrap().is_empty());
    assert_eq!(svc.orders(ALICE).await.unwrap().len(), 1);
}

#[tokio::test]
async fn bad_numbers_are_invalid_format() {
    let svc = LoyaltyService::new(Arc::new(MemStore::new()));
    for raw in ["", "12a4", "7", "79927398710"] {
        let err = svc.submit_order(ALICE, raw).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidFormat(_)), "{raw:?}: {err:?}");
    }
    assert!(svc.orders(ALICE).await.unwrap().is_empty());
}

#[tokio::test]
async fn orders_are_listed_newest_first() {
    let svc = LoyaltyService::new(Arc::new(MemStore::new()));
    let numbers = loyal_testkit::order_numbers(1_000, 4).unwrap();
    for n in &numbers {
        svc.submit_order(ALICE, n.as_str()).await.unwrap();
    }

    let listed: Vec<_> = svc
        .orders(ALICE)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.number)
        .collect();
    let mut expected = numbers;
    expected.reverse();
    assert_eq!(listed, expected);
}
