//! loyal-ledger
//!
//! Synchronous core operations behind the public API: order submission,
//! withdrawals, and the per-user read accessors. Every failure a caller can
//! see is one of the [`ServiceError`] variants; reconciliation problems never
//! surface here.

use std::sync::Arc;

use loyal_db::{LoyaltyStore, SubmitOutcome, WithdrawOutcome};
use loyal_schemas::{
    Balance, Order, OrderNumber, OrderNumberError, Points, UserId, Withdrawal,
};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid order number: {0}")]
    InvalidFormat(#[from] OrderNumberError),
    #[error("order number already uploaded by another user")]
    Conflict,
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("insufficient funds: current={current} requested={requested}")]
    InsufficientFunds { current: Points, requested: Points },
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResult {
    /// Newly recorded as `NEW`.
    Accepted(Order),
    /// This user already submitted the number; returns the existing order.
    AlreadyUploaded(Order),
}

impl SubmitResult {
    pub fn order(&self) -> &Order {
        match self {
            SubmitResult::Accepted(o) | SubmitResult::AlreadyUploaded(o) => o,
        }
    }
}

#[derive(Clone)]
pub struct LoyaltyService {
    store: Arc<dyn LoyaltyStore>,
}

impl LoyaltyService {
    pub fn new(store: Arc<dyn LoyaltyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LoyaltyStore> {
        &self.store
    }

    pub async fn submit_order(&self, user: UserId, raw: &str) -> Result<SubmitResult, ServiceError> {
        let number = OrderNumber::parse(raw)?;
        match self
            .store
            .submit_order(user, &number)
            .await
            .map_err(ServiceError::Storage)?
        {
            SubmitOutcome::Created(order) => {
                info!(order = %order.number, user = %user, "order accepted");
                Ok(SubmitResult::Accepted(order))
            }
            SubmitOutcome::AlreadyOwned(order) => Ok(SubmitResult::AlreadyUploaded(order)),
            SubmitOutcome::OwnedByOther => Err(ServiceError::Conflict),
        }
    }

    /// Debit `sum` and record the withdrawal against `raw_number`, which must
    /// pass the order-number checksum but need not be a known order.
    pub async fn withdraw(
        &self,
        user: UserId,
        raw_number: &str,
        sum: Points,
    ) -> Result<Withdrawal, ServiceError> {
        let number = OrderNumber::parse(raw_number)?;
        if !sum.is_positive() {
            return Err(ServiceError::InvalidAmount(format!(
                "withdrawal sum must be positive, got {sum}"
            )));
        }

        match self
            .store
            .withdraw(user, &number, sum)
            .await
            .map_err(ServiceError::Storage)?
        {
            WithdrawOutcome::Completed(w) => {
                info!(order = %w.number, user = %user, sum = %w.sum, "withdrawal completed");
                Ok(w)
            }
            WithdrawOutcome::InsufficientFunds { current } => Err(ServiceError::InsufficientFunds {
                current,
                requested: sum,
            }),
        }
    }

    /// Newest first.
    pub async fn orders(&self, user: UserId) -> Result<Vec<Order>, ServiceError> {
        self.store
            .orders_for_user(user)
            .await
            .map_err(ServiceError::Storage)
    }

    pub async fn balance(&self, user: UserId) -> Result<Balance, ServiceError> {
        self.store.balance(user).await.map_err(ServiceError::Storage)
    }

    /// Newest first.
    pub async fn withdrawals(&self, user: UserId) -> Result<Vec<Withdrawal>, ServiceError> {
        self.store
            .withdrawals_for_user(user)
            .await
            .map_err(ServiceError::Storage)
    }
}
