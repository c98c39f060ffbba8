//! loyal-testkit
//!
//! Test doubles for the storage and accrual boundaries, plus small fixture
//! helpers. Scenario tests that span crates live under `tests/`.

mod mem_store;
mod scripted_gateway;

pub use mem_store::MemStore;
pub use scripted_gateway::{Scripted, ScriptedGateway};

use anyhow::Result;
use loyal_schemas::OrderNumber;

/// A checksum-valid order number derived from `n`.
pub fn order_number(n: u64) -> Result<OrderNumber> {
    Ok(OrderNumber::with_check_digit(&n.to_string())?)
}

/// `count` distinct valid numbers starting at `first`.
pub fn order_numbers(first: u64, count: usize) -> Result<Vec<OrderNumber>> {
    (first..first + count as u64).map(order_number).collect()
}
