//! loyal-accrual
//!
//! Client side of the external accrual authority: one verdict per order
//! number, with every failure classified as retryable or fatal.

mod backoff;
mod client;

pub use backoff::{AttemptContext, BackoffPolicy};
pub use client::{classify_response, parse_retry_hint, HttpAccrualClient, MAX_RETRY_HINT};

use std::time::Duration;

use loyal_schemas::{OrderNumber, OrderStatus, Points};

/// What the authority currently says about an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// `REGISTERED` or `PROCESSING` upstream.
    Processing,
    Invalid,
    Processed(Points),
}

impl Verdict {
    pub fn status(&self) -> OrderStatus {
        match self {
            Verdict::Processing => OrderStatus::Processing,
            Verdict::Invalid => OrderStatus::Invalid,
            Verdict::Processed(_) => OrderStatus::Processed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("rate limited by accrual authority (retry_after={retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("order not registered with accrual authority yet")]
    NotRegistered,
    #[error("accrual authority server error: status={status}")]
    Server { status: u16 },
    #[error("accrual transport error: {0}")]
    Transport(String),
    #[error("unexpected accrual response: status={status}")]
    Unexpected { status: u16 },
    #[error("accrual request rejected: status={status}")]
    Rejected { status: u16 },
    #[error("accrual protocol violation: {0}")]
    Protocol(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::RateLimited { .. }
            | GatewayError::NotRegistered
            | GatewayError::Server { .. }
            | GatewayError::Transport(_)
            | GatewayError::Unexpected { .. } => true,
            GatewayError::Rejected { .. } | GatewayError::Protocol(_) => false,
        }
    }

    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// The authority answered 200 about this order, even if the body was
    /// unusable. Such orders are known upstream.
    pub fn acknowledged(&self) -> bool {
        matches!(self, GatewayError::Protocol(_))
    }
}

/// Source of verdicts. `HttpAccrualClient` in production; scripted doubles in
/// tests.
#[async_trait::async_trait]
pub trait AccrualGateway: Send + Sync {
    async fn fetch_verdict(&self, number: &OrderNumber) -> Result<Verdict, GatewayError>;
}
