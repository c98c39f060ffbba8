use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use loyal_accrual::{AccrualGateway, AttemptContext, GatewayError, Verdict};
use loyal_db::{ApplyOutcome, LoyaltyStore, PendingCursor, TerminalVerdict};
use loyal_schemas::{Order, OrderNumber, OrderStatus, Points};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ReconcileConfig;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened to one order in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOutcome {
    /// `PROCESSED` applied and the owner credited.
    Credited(Points),
    /// `INVALID` applied.
    Invalidated,
    /// `NEW -> PROCESSING`.
    Advanced,
    /// Nothing to write (still processing upstream, or already terminal).
    Unchanged,
    /// Retryable failures used up this cycle's attempts, the next delay
    /// was longer than the inline backoff allows, or shutdown interrupted a
    /// backoff. Eligible again next cycle or once its retry hint elapses.
    Deferred,
    /// Skipped without a gateway call: an earlier retry hint has not
    /// elapsed yet.
    Waiting,
    /// Non-retryable gateway failure or storage error. Eligible again next
    /// cycle.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub selected: u64,
    pub processed: u64,
    pub invalid: u64,
    pub advanced: u64,
    pub unchanged: u64,
    pub deferred: u64,
    pub waiting: u64,
    pub failed: u64,
    pub credited: Points,
}

impl CycleReport {
    pub fn record(&mut self, outcome: OrderOutcome) {
        self.selected += 1;
        match outcome {
            OrderOutcome::Credited(p) => {
                self.processed += 1;
                self.credited += p;
            }
            OrderOutcome::Invalidated => self.invalid += 1,
            OrderOutcome::Advanced => self.advanced += 1,
            OrderOutcome::Unchanged => self.unchanged += 1,
            OrderOutcome::Deferred => self.deferred += 1,
            OrderOutcome::Waiting => self.waiting += 1,
            OrderOutcome::Failed => self.failed += 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selected == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle held the guard.
    Skipped,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct ReconcileWorker {
    store: Arc<dyn LoyaltyStore>,
    gateway: Arc<dyn AccrualGateway>,
    cfg: ReconcileConfig,
    cycle_guard: Mutex<()>,
    /// Orders not eligible for a gateway call before the given instant.
    /// Entries are dropped once they expire or the order settles.
    not_before: StdMutex<HashMap<OrderNumber, Instant>>,
}

impl ReconcileWorker {
    pub fn new(
        store: Arc<dyn LoyaltyStore>,
        gateway: Arc<dyn AccrualGateway>,
        cfg: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            cfg,
            cycle_guard: Mutex::new(()),
            not_before: StdMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.cfg
    }

    /// Spawn [`ReconcileWorker::run`] on the current runtime.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Poll until `cancel` fires. Returns once the in-flight cycle is done.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            poll_ms = self.cfg.poll_interval.as_millis() as u64,
            page_size = self.cfg.page_size,
            concurrency = self.cfg.concurrency,
            "reconcile worker started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_cycle(&cancel).await {
                Ok(CycleOutcome::Completed(report)) => log_report(&report),
                Ok(CycleOutcome::Skipped) => debug!("reconcile cycle skipped: previous still running"),
                Err(e) => warn!(error = %e, "reconcile cycle aborted"),
            }
        }

        info!("reconcile worker stopped");
    }

    /// One pass over pending orders. A concurrent call returns `Skipped`.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            return Ok(CycleOutcome::Skipped);
        };

        let mut report = CycleReport::default();
        let mut cursor: Option<PendingCursor> = None;
        self.prune_not_before(Instant::now());

        for _ in 0..self.cfg.max_pages_per_cycle {
            if cancel.is_cancelled() {
                break;
            }

            let page = self.store.pending_orders(cursor, self.cfg.page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(PendingCursor::after(last));
            let full_page = page.len() >= self.cfg.page_size as usize;

            let now = Instant::now();
            let mut tasks = Vec::with_capacity(page.len());
            for order in page {
                if self.waiting_until(&order.number, now).is_some() {
                    report.record(OrderOutcome::Waiting);
                } else {
                    tasks.push(self.reconcile_order(order, cancel));
                }
            }
            let outcomes: Vec<OrderOutcome> = stream::iter(tasks)
                .buffer_unordered(self.cfg.concurrency.max(1))
                .collect()
                .await;
            for o in outcomes {
                report.record(o);
            }

            if !full_page {
                break;
            }
        }

        Ok(CycleOutcome::Completed(report))
    }

    async fn reconcile_order(&self, order: Order, cancel: &CancellationToken) -> OrderOutcome {
        let outcome = self.attempt_order(&order, cancel).await;
        if outcome != OrderOutcome::Deferred {
            self.lock_not_before().remove(&order.number);
        }
        outcome
    }

    async fn attempt_order(&self, order: &Order, cancel: &CancellationToken) -> OrderOutcome {
        let policy = self.cfg.backoff;
        let mut ctx = AttemptContext::new();

        loop {
            let err = match self.gateway.fetch_verdict(&order.number).await {
                Ok(verdict) => return self.apply(order, verdict).await,
                Err(err) => err,
            };
            ctx.record_failure(&err);

            if !ctx.can_retry(&policy, &err) {
                return self.give_up(order, &err, ctx.failures()).await;
            }

            let delay = ctx.next_delay(&policy);
            if delay > policy.max_delay {
                // Only a server hint gets here; computed delays are capped.
                self.defer_for(&order.number, delay);
                debug!(
                    order = %order.number,
                    attempt = ctx.failures(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retry hint exceeds inline backoff; order deferred"
                );
                return OrderOutcome::Deferred;
            }

            debug!(
                order = %order.number,
                attempt = ctx.failures(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "accrual call failed; backing off"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return OrderOutcome::Deferred,
            }
        }
    }

    async fn give_up(&self, order: &Order, err: &GatewayError, attempts: u32) -> OrderOutcome {
        if err.is_retryable() {
            if let Some(hint) = err.retry_hint() {
                self.defer_for(&order.number, hint);
            }
            debug!(order = %order.number, attempts, error = %err, "order deferred to next cycle");
            return OrderOutcome::Deferred;
        }

        warn!(
            order = %order.number,
            user = %order.owner,
            error = %err,
            "accrual verdict unusable; order left pending"
        );
        if err.acknowledged() && order.status == OrderStatus::New {
            // Known upstream: record that much, never a terminal state.
            return self.advance(order).await;
        }
        OrderOutcome::Failed
    }

    // -----------------------------------------------------------------------
    // Not-before bookkeeping
    // -----------------------------------------------------------------------

    fn lock_not_before(&self) -> std::sync::MutexGuard<'_, HashMap<OrderNumber, Instant>> {
        self.not_before.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn defer_for(&self, number: &OrderNumber, delay: Duration) {
        self.lock_not_before().insert(number.clone(), Instant::now() + delay);
    }

    /// The instant `number` becomes eligible again, if still in the future.
    fn waiting_until(&self, number: &OrderNumber, now: Instant) -> Option<Instant> {
        self.lock_not_before()
            .get(number)
            .copied()
            .filter(|until| *until > now)
    }

    fn prune_not_before(&self, now: Instant) {
        self.lock_not_before().retain(|_, until| *until > now);
    }

    async fn advance(&self, order: &Order) -> OrderOutcome {
        match self.store.mark_processing(&order.number).await {
            Ok(true) => OrderOutcome::Advanced,
            Ok(false) => OrderOutcome::Unchanged,
            Err(e) => {
                warn!(order = %order.number, error = %e, "mark_processing failed");
                OrderOutcome::Failed
            }
        }
    }

    async fn apply(&self, order: &Order, verdict: Verdict) -> OrderOutcome {
        let terminal = match verdict {
            Verdict::Processing if order.status == OrderStatus::New => {
                return self.advance(order).await
            }
            Verdict::Processing => return OrderOutcome::Unchanged,
            Verdict::Invalid => TerminalVerdict::Invalid,
            Verdict::Processed(amount) => TerminalVerdict::Processed(amount),
        };

        match self.store.apply_verdict(&order.number, terminal).await {
            Ok(ApplyOutcome::Applied { owner, credited }) => {
                info!(
                    order = %order.number,
                    user = %owner,
                    status = %terminal.status(),
                    credited = %credited,
                    "order reconciled"
                );
                match terminal {
                    TerminalVerdict::Processed(_) => OrderOutcome::Credited(credited),
                    TerminalVerdict::Invalid => OrderOutcome::Invalidated,
                }
            }
            Ok(ApplyOutcome::AlreadyTerminal(status)) => {
                debug!(order = %order.number, %status, "order already terminal");
                OrderOutcome::Unchanged
            }
            Ok(ApplyOutcome::NotFound) => {
                warn!(order = %order.number, "order vanished during reconcile");
                OrderOutcome::Unchanged
            }
            Err(e) => {
                warn!(order = %order.number, user = %order.owner, error = %e, "apply_verdict failed");
                OrderOutcome::Failed
            }
        }
    }
}

fn log_report(r: &CycleReport) {
    if r.is_empty() {
        debug!("reconcile cycle: no pending orders");
        return;
    }
    info!(
        selected = r.selected,
        processed = r.processed,
        invalid = r.invalid,
        advanced = r.advanced,
        unchanged = r.unchanged,
        deferred = r.deferred,
        waiting = r.waiting,
        failed = r.failed,
        credited = %r.credited,
        "reconcile cycle complete"
    );
}
