//! loyal-schemas
//!
//! Domain vocabulary shared by storage, the reconciliation worker and the API
//! layer. Pure types and rules; no IO.

mod balance;
mod order_number;
mod points;

pub use balance::{Balance, LedgerError};
pub use order_number::{luhn_valid, OrderNumber, OrderNumberError};
pub use points::{Points, PointsError, MICROS_PER_POINT};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque reference to a user owned by the (external) auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid order status: {0}")]
pub struct UnknownStatus(pub String);

/// Order lifecycle: `NEW -> PROCESSING -> {PROCESSED | INVALID}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Processing,
    Processed,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownStatus> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "PROCESSED" => Ok(OrderStatus::Processed),
            "INVALID" => Ok(OrderStatus::Invalid),
            other => Err(UnknownStatus(other.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }

    fn rank(&self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Processed | OrderStatus::Invalid => 2,
        }
    }

    /// Status only moves forward, and terminal states are final.
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Statuses the reconciliation worker polls for.
    pub const PENDING: [OrderStatus; 2] = [OrderStatus::New, OrderStatus::Processing];
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted purchase order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Storage surrogate key; tie-breaker for oldest-first ordering.
    pub id: i64,
    pub number: OrderNumber,
    pub owner: UserId,
    pub status: OrderStatus,
    /// Present only once the order is `PROCESSED`.
    pub accrual: Option<Points>,
    pub uploaded_at: DateTime<Utc>,
}

/// A completed withdrawal. The number is order-shaped but need not refer to
/// an existing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub id: i64,
    pub number: OrderNumber,
    pub owner: UserId,
    pub sum: Points,
    pub processed_at: DateTime<Utc>,
}
