//! Scenario: withdrawals never overdraw and failed ones leave no trace.
//!
//! # Invariant under test
//! A withdrawal larger than `current` fails with `InsufficientFunds` and
//! leaves balance and history untouched. A successful one moves the sum from
//! `current` to `withdrawn` and is recorded, all at once.

use std::sync::Arc;

use loyal_ledger::{LoyaltyService, ServiceError};
use loyal_schemas::{Points, UserId};
use loyal_testkit::MemStore;

const USER: UserId = UserId(42);

async fn funded(amount: Points) -> (Arc<MemStore>, LoyaltyService) {
    let store = Arc::new(MemStore::new());
    store.fund(USER, amount).await.unwrap();
    let svc = LoyaltyService::new(store.clone());
    (store, svc)
}

#[tokio::test]
async fn overdraw_is_refused_and_changes_nothing() {
    let (_store, svc) = funded(Points::whole(100)).await;

    let err = svc
        .withdraw(USER, "2377225624", Points::whole(150))
        .await
        .unwrap_err();
    match err {
        ServiceError::InsufficientFunds { current, requested } => {
            assert_eq!(current, Points::whole(100));
            assert_eq!(requested, Points::whole(150));
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }

    let b = svc.balance(USER).await.unwrap();
    assert_eq!(b.current, Points::whole(100));
    assert_eq!(b.withdrawn, Points::ZERO);
    assert!(svc.withdrawals(USER).await.unwrap().is_empty());
}

#[tokio::test]
async fn successful_withdrawal_moves_points_and_is_recorded() {
    let (_store, svc) = funded(Points::parse_decimal("729.98").unwrap()).await;

    let w = svc
        .withdraw(USER, "2377225624", Points::whole(700))
        .await
        .unwrap();
    assert_eq!(w.sum, Points::whole(700));
    assert_eq!(w.number.as_str(), "2377225624");

    let b = svc.balance(USER).await.unwrap();
    assert_eq!(b.current, Points::parse_decimal("29.98").unwrap());
    assert_eq!(b.withdrawn, Points::whole(700));

    // Exactly draining the balance is allowed.
    svc.withdraw(USER, "79927398713", Points::parse_decimal("29.98").unwrap())
        .await
        .unwrap();
    let b = svc.balance(USER).await.unwrap();
    assert_eq!(b.current, Points::ZERO);

    let history = svc.withdrawals(USER).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].number.as_str(), "79927398713", "newest first");
}

#[tokio::test]
async fn bad_number_or_sum_is_rejected_before_touching_the_ledger() {
    let (_store, svc) = funded(Points::whole(10)).await;

    let err = svc
        .withdraw(USER, "2377225625", Points::whole(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidFormat(_)), "{err:?}");

    for sum in [Points::ZERO, Points::new(-1)] {
        let err = svc.withdraw(USER, "2377225624", sum).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidAmount(_)), "{err:?}");
    }

    assert_eq!(svc.balance(USER).await.unwrap().current, Points::whole(10));
}

#[tokio::test]
async fn user_without_ledger_row_has_zero_balance() {
    let svc = LoyaltyService::new(Arc::new(MemStore::new()));
    let b = svc.balance(UserId(999)).await.unwrap();
    assert_eq!(b.current, Points::ZERO);
    assert_eq!(b.withdrawn, Points::ZERO);
}
