//! loyal-reconcile
//!
//! Reconciliation worker: on a fixed interval, walk the orders still waiting
//! for a final verdict (oldest first), ask the accrual authority about each,
//! and apply terminal verdicts atomically (status + credit).
//!
//! - One cycle at a time. A cycle requested while another runs is skipped.
//! - Orders within a page run with bounded concurrency; one order's failure
//!   or backoff never holds up the others.
//! - Transient gateway failures are retried per `BackoffPolicy` within the
//!   cycle, then deferred to the next cycle. Nothing is marked `INVALID`
//!   unless the authority says so.

mod config;
mod worker;

pub use config::ReconcileConfig;
pub use worker::{CycleOutcome, CycleReport, OrderOutcome, ReconcileWorker};
