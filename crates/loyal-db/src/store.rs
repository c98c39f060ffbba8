//! The storage boundary consumed by the reconciliation worker and the API.
//!
//! Every method that changes more than one row runs in a single transaction
//! in the Postgres implementation; test doubles must give the same
//! all-or-nothing guarantee.

use anyhow::Result;
use chrono::{DateTime, Utc};
use loyal_schemas::{Balance, Order, OrderNumber, OrderStatus, Points, UserId, Withdrawal};

/// Result of registering an order number for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created(Order),
    /// The same user submitted this number before; nothing was written.
    AlreadyOwned(Order),
    /// Another user owns this number.
    OwnedByOther,
}

/// Keyset position for oldest-first pagination of pending orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCursor {
    pub uploaded_at: DateTime<Utc>,
    pub order_id: i64,
}

impl PendingCursor {
    pub fn after(order: &Order) -> Self {
        Self {
            uploaded_at: order.uploaded_at,
            order_id: order.id,
        }
    }
}

/// A final verdict from the accrual authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalVerdict {
    Processed(Points),
    Invalid,
}

impl TerminalVerdict {
    pub fn status(&self) -> OrderStatus {
        match self {
            TerminalVerdict::Processed(_) => OrderStatus::Processed,
            TerminalVerdict::Invalid => OrderStatus::Invalid,
        }
    }

    pub fn accrual(&self) -> Option<Points> {
        match self {
            TerminalVerdict::Processed(p) => Some(*p),
            TerminalVerdict::Invalid => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Status, accrual and (for `PROCESSED`) the balance credit landed together.
    Applied { owner: UserId, credited: Points },
    /// The order was already terminal; nothing was written.
    AlreadyTerminal(OrderStatus),
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Completed(Withdrawal),
    /// Nothing was written. `current` is the balance observed under lock.
    InsufficientFunds { current: Points },
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

#[async_trait::async_trait]
pub trait LoyaltyStore: Send + Sync {
    async fn submit_order(&self, owner: UserId, number: &OrderNumber) -> Result<SubmitOutcome>;

    async fn order(&self, number: &OrderNumber) -> Result<Option<Order>>;

    /// Newest first.
    async fn orders_for_user(&self, owner: UserId) -> Result<Vec<Order>>;

    /// Newest first.
    async fn withdrawals_for_user(&self, owner: UserId) -> Result<Vec<Withdrawal>>;

    /// A user with no ledger row yet has a zero balance.
    async fn balance(&self, owner: UserId) -> Result<Balance>;

    /// Orders in `NEW` or `PROCESSING`, oldest submitted first, strictly
    /// after `after` when given.
    async fn pending_orders(&self, after: Option<PendingCursor>, limit: u32)
        -> Result<Vec<Order>>;

    /// `NEW -> PROCESSING`. Returns `false` if the order was not `NEW`.
    async fn mark_processing(&self, number: &OrderNumber) -> Result<bool>;

    /// Atomically set the terminal status and accrual, crediting the owner
    /// for `PROCESSED`. Applying to an already-terminal order is a no-op.
    async fn apply_verdict(
        &self,
        number: &OrderNumber,
        verdict: TerminalVerdict,
    ) -> Result<ApplyOutcome>;

    /// Atomically debit `sum` and record the withdrawal. Concurrent calls for
    /// the same owner serialise on the balance.
    async fn withdraw(
        &self,
        owner: UserId,
        number: &OrderNumber,
        sum: Points,
    ) -> Result<WithdrawOutcome>;

    async fn status(&self) -> Result<DbStatus>;
}
