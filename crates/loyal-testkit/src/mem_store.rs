//! In-memory [`LoyaltyStore`].
//!
//! One async mutex around all state: every operation is serialisable, which
//! is at least as strong as the row locks the Postgres store takes. Balance
//! arithmetic goes through `Balance::credit` / `Balance::debit`, the same
//! rules the Postgres ledger shell applies.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use loyal_db::{
    ApplyOutcome, DbStatus, LoyaltyStore, PendingCursor, SubmitOutcome, TerminalVerdict,
    WithdrawOutcome,
};
use loyal_schemas::{
    Balance, LedgerError, Order, OrderNumber, OrderStatus, Points, UserId, Withdrawal,
};
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    orders: Vec<Order>,
    by_number: HashMap<OrderNumber, usize>,
    balances: HashMap<UserId, Balance>,
    withdrawals: Vec<Withdrawal>,
    last_ts: Option<DateTime<Utc>>,
    fail_apply: HashSet<OrderNumber>,
    apply_calls: u64,
}

impl State {
    /// Wall clock, forced strictly increasing so insertion order is also
    /// timestamp order.
    fn next_ts(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_ts {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        self.last_ts = Some(ts);
        ts
    }

    fn balance(&self, owner: UserId) -> Balance {
        self.balances
            .get(&owner)
            .copied()
            .unwrap_or_else(|| Balance::empty(owner))
    }
}

#[derive(Default)]
pub struct MemStore {
    state: Mutex<State>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an order directly in the given state, bypassing reconciliation.
    pub async fn seed_order(
        &self,
        owner: UserId,
        number: &OrderNumber,
        status: OrderStatus,
        accrual: Option<Points>,
    ) -> Result<Order> {
        let mut st = self.state.lock().await;
        if st.by_number.contains_key(number) {
            bail!("order {number} already seeded");
        }
        let order = Order {
            id: st.orders.len() as i64 + 1,
            number: number.clone(),
            owner,
            status,
            accrual,
            uploaded_at: st.next_ts(),
        };
        let idx = st.orders.len();
        st.orders.push(order.clone());
        st.by_number.insert(number.clone(), idx);
        Ok(order)
    }

    /// Put points on a balance without an order behind them.
    pub async fn fund(&self, owner: UserId, amount: Points) -> Result<Balance> {
        let mut st = self.state.lock().await;
        let mut b = st.balance(owner);
        b.credit(amount)?;
        st.balances.insert(owner, b);
        Ok(b)
    }

    /// The next `apply_verdict` for `number` fails before writing anything.
    pub async fn fail_next_apply(&self, number: &OrderNumber) {
        self.state.lock().await.fail_apply.insert(number.clone());
    }

    /// Number of `apply_verdict` calls seen, including refused ones.
    pub async fn apply_calls(&self) -> u64 {
        self.state.lock().await.apply_calls
    }
}

#[async_trait::async_trait]
impl LoyaltyStore for MemStore {
    async fn submit_order(&self, owner: UserId, number: &OrderNumber) -> Result<SubmitOutcome> {
        let mut st = self.state.lock().await;
        if let Some(&idx) = st.by_number.get(number) {
            let existing = &st.orders[idx];
            return Ok(if existing.owner == owner {
                SubmitOutcome::AlreadyOwned(existing.clone())
            } else {
                SubmitOutcome::OwnedByOther
            });
        }

        let order = Order {
            id: st.orders.len() as i64 + 1,
            number: number.clone(),
            owner,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: st.next_ts(),
        };
        let idx = st.orders.len();
        st.orders.push(order.clone());
        st.by_number.insert(number.clone(), idx);
        Ok(SubmitOutcome::Created(order))
    }

    async fn order(&self, number: &OrderNumber) -> Result<Option<Order>> {
        let st = self.state.lock().await;
        Ok(st.by_number.get(number).map(|&i| st.orders[i].clone()))
    }

    async fn orders_for_user(&self, owner: UserId) -> Result<Vec<Order>> {
        let st = self.state.lock().await;
        let mut out: Vec<Order> = st
            .orders
            .iter()
            .filter(|o| o.owner == owner)
            .cloned()
            .collect();
        out.sort_by(|a, b| (b.uploaded_at, b.id).cmp(&(a.uploaded_at, a.id)));
        Ok(out)
    }

    async fn withdrawals_for_user(&self, owner: UserId) -> Result<Vec<Withdrawal>> {
        let st = self.state.lock().await;
        let mut out: Vec<Withdrawal> = st
            .withdrawals
            .iter()
            .filter(|w| w.owner == owner)
            .cloned()
            .collect();
        out.sort_by(|a, b| (b.processed_at, b.id).cmp(&(a.processed_at, a.id)));
        Ok(out)
    }

    async fn balance(&self, owner: UserId) -> Result<Balance> {
        Ok(self.state.lock().await.balance(owner))
    }

    async fn pending_orders(
        &self,
        after: Option<PendingCursor>,
        limit: u32,
    ) -> Result<Vec<Order>> {
        let st = self.state.lock().await;
        let mut out: Vec<Order> = st
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .filter(|o| match after {
                Some(c) => (o.uploaded_at, o.id) > (c.uploaded_at, c.order_id),
                None => true,
            })
            .cloned()
            .collect();
        out.sort_by_key(|o| (o.uploaded_at, o.id));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn mark_processing(&self, number: &OrderNumber) -> Result<bool> {
        let mut st = self.state.lock().await;
        let Some(&idx) = st.by_number.get(number) else {
            return Ok(false);
        };
        let order = &mut st.orders[idx];
        if order.status != OrderStatus::New {
            return Ok(false);
        }
        order.status = OrderStatus::Processing;
        Ok(true)
    }

    async fn apply_verdict(
        &self,
        number: &OrderNumber,
        verdict: TerminalVerdict,
    ) -> Result<ApplyOutcome> {
        let mut st = self.state.lock().await;
        st.apply_calls += 1;
        if st.fail_apply.remove(number) {
            bail!("injected storage failure for order {number}");
        }

        let Some(&idx) = st.by_number.get(number) else {
            return Ok(ApplyOutcome::NotFound);
        };
        let (owner, current) = {
            let o = &st.orders[idx];
            (o.owner, o.status)
        };
        if current.is_terminal() {
            return Ok(ApplyOutcome::AlreadyTerminal(current));
        }

        // Compute the new balance first so a refused credit writes nothing.
        let credited = verdict.accrual().unwrap_or(Points::ZERO);
        let mut bal = st.balance(owner);
        if let TerminalVerdict::Processed(amount) = verdict {
            bal.credit(amount)
                .map_err(|e| anyhow!("credit refused for user {owner}: {e}"))?;
        }

        let order = &mut st.orders[idx];
        order.status = verdict.status();
        order.accrual = verdict.accrual();
        if matches!(verdict, TerminalVerdict::Processed(_)) {
            st.balances.insert(owner, bal);
        }
        Ok(ApplyOutcome::Applied { owner, credited })
    }

    async fn withdraw(
        &self,
        owner: UserId,
        number: &OrderNumber,
        sum: Points,
    ) -> Result<WithdrawOutcome> {
        let mut st = self.state.lock().await;
        let mut bal = st.balance(owner);
        match bal.debit(sum) {
            Ok(()) => {}
            Err(LedgerError::InsufficientFunds { current, .. }) => {
                return Ok(WithdrawOutcome::InsufficientFunds { current });
            }
            Err(e) => bail!("withdraw refused for user {owner}: {e}"),
        }

        let w = Withdrawal {
            id: st.withdrawals.len() as i64 + 1,
            number: number.clone(),
            owner,
            sum,
            processed_at: st.next_ts(),
        };
        st.balances.insert(owner, bal);
        st.withdrawals.push(w.clone());
        Ok(WithdrawOutcome::Completed(w))
    }

    async fn status(&self) -> Result<DbStatus> {
        Ok(DbStatus {
            ok: true,
            has_orders_table: true,
        })
    }
}
