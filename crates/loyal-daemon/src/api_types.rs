//! Request and response types for the loyal-daemon HTTP endpoints.
//!
//! Amounts are [`Points`], which serialize as JSON numbers. No business logic
//! lives here.

use chrono::{DateTime, Utc};
use loyal_schemas::{Balance, Order, OrderStatus, Points, Withdrawal};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// /api/user/orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Points>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(o: Order) -> Self {
        Self {
            number: o.number.into_string(),
            status: o.status,
            accrual: o.accrual,
            uploaded_at: o.uploaded_at,
        }
    }
}

// ---------------------------------------------------------------------------
// /api/user/balance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub current: Points,
    pub withdrawn: Points,
}

impl From<Balance> for BalanceResponse {
    fn from(b: Balance) -> Self {
        Self {
            current: b.current,
            withdrawn: b.withdrawn,
        }
    }
}

// ---------------------------------------------------------------------------
// /api/user/balance/withdraw  /api/user/withdrawals
// ---------------------------------------------------------------------------

/// `sum` is the raw JSON number; range checks happen in the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalResponse {
    pub order: String,
    pub sum: Points,
    pub processed_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(w: Withdrawal) -> Self {
        Self {
            order: w.number.into_string(),
            sum: w.sum,
            processed_at: w.processed_at,
        }
    }
}
