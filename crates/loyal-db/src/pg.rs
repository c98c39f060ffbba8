use anyhow::{anyhow, bail, Context, Result};
use loyal_schemas::{
    Balance, LedgerError, Order, OrderNumber, OrderStatus, Points, UserId, Withdrawal,
};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::debug;

use crate::ledger::{self, DebitOutcome};
use crate::store::{
    ApplyOutcome, DbStatus, LoyaltyStore, PendingCursor, SubmitOutcome, TerminalVerdict,
    WithdrawOutcome,
};

const ORDER_COLUMNS: &str = "order_id, number, user_id, status, accrual_micros, uploaded_at";

/// Postgres-backed [`LoyaltyStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    let number: String = row.try_get("number")?;
    let status: String = row.try_get("status")?;
    let accrual: Option<i64> = row.try_get("accrual_micros")?;
    Ok(Order {
        id: row.try_get("order_id")?,
        number: OrderNumber::parse(&number)
            .with_context(|| format!("stored order number is invalid: {number}"))?,
        owner: UserId(row.try_get("user_id")?),
        status: OrderStatus::parse(&status)?,
        accrual: accrual.map(Points::new),
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

fn withdrawal_from_row(row: &PgRow) -> Result<Withdrawal> {
    let number: String = row.try_get("number")?;
    Ok(Withdrawal {
        id: row.try_get("withdrawal_id")?,
        number: OrderNumber::parse(&number)
            .with_context(|| format!("stored withdrawal number is invalid: {number}"))?,
        owner: UserId(row.try_get("user_id")?),
        sum: Points::new(row.try_get("sum_micros")?),
        processed_at: row.try_get("processed_at")?,
    })
}

#[async_trait::async_trait]
impl LoyaltyStore for PgStore {
    async fn submit_order(&self, owner: UserId, number: &OrderNumber) -> Result<SubmitOutcome> {
        let inserted = sqlx::query(&format!(
            r#"
            insert into orders (number, user_id, status)
            values ($1, $2, 'NEW')
            on conflict (number) do nothing
            returning {ORDER_COLUMNS}
            "#
        ))
        .bind(number.as_str())
        .bind(owner.0)
        .fetch_optional(&self.pool)
        .await
        .context("submit_order insert failed")?;

        if let Some(row) = inserted {
            return Ok(SubmitOutcome::Created(order_from_row(&row)?));
        }

        // Conflict: the number exists. Rows are never deleted, so it is there.
        let existing = self
            .order(number)
            .await?
            .ok_or_else(|| anyhow!("order {number} conflicted on insert but is missing"))?;

        if existing.owner == owner {
            Ok(SubmitOutcome::AlreadyOwned(existing))
        } else {
            Ok(SubmitOutcome::OwnedByOther)
        }
    }

    async fn order(&self, number: &OrderNumber) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from orders where number = $1"
        ))
        .bind(number.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("order lookup failed")?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn orders_for_user(&self, owner: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            select {ORDER_COLUMNS}
            from orders
            where user_id = $1
            order by uploaded_at desc, order_id desc
            "#
        ))
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await
        .context("orders_for_user failed")?;

        rows.iter().map(order_from_row).collect()
    }

    async fn withdrawals_for_user(&self, owner: UserId) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query(
            r#"
            select withdrawal_id, user_id, number, sum_micros, processed_at
            from withdrawals
            where user_id = $1
            order by processed_at desc, withdrawal_id desc
            "#,
        )
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await
        .context("withdrawals_for_user failed")?;

        rows.iter().map(withdrawal_from_row).collect()
    }

    async fn balance(&self, owner: UserId) -> Result<Balance> {
        let row = sqlx::query(
            r#"
            select current_micros, withdrawn_micros
            from balances
            where user_id = $1
            "#,
        )
        .bind(owner.0)
        .fetch_optional(&self.pool)
        .await
        .context("balance lookup failed")?;

        match row {
            None => Ok(Balance::empty(owner)),
            Some(row) => Ok(Balance {
                owner,
                current: Points::new(row.try_get("current_micros")?),
                withdrawn: Points::new(row.try_get("withdrawn_micros")?),
            }),
        }
    }

    async fn pending_orders(
        &self,
        after: Option<PendingCursor>,
        limit: u32,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            select {ORDER_COLUMNS}
            from orders
            where status in ('NEW', 'PROCESSING')
              and ($1::timestamptz is null or (uploaded_at, order_id) > ($1, $2))
            order by uploaded_at asc, order_id asc
            limit $3
            "#
        ))
        .bind(after.map(|c| c.uploaded_at))
        .bind(after.map(|c| c.order_id))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("pending_orders failed")?;

        rows.iter().map(order_from_row).collect()
    }

    async fn mark_processing(&self, number: &OrderNumber) -> Result<bool> {
        let res = sqlx::query(
            r#"
            update orders
            set status = 'PROCESSING'
            where number = $1
              and status = 'NEW'
            "#,
        )
        .bind(number.as_str())
        .execute(&self.pool)
        .await
        .context("mark_processing failed")?;

        Ok(res.rows_affected() == 1)
    }

    async fn apply_verdict(
        &self,
        number: &OrderNumber,
        verdict: TerminalVerdict,
    ) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await.context("begin tx failed")?;

        let row = sqlx::query(
            r#"
            select user_id, status
            from orders
            where number = $1
            for update
            "#,
        )
        .bind(number.as_str())
        .fetch_optional(&mut *tx)
        .await
        .context("apply_verdict order lock failed")?;

        let Some(row) = row else {
            return Ok(ApplyOutcome::NotFound);
        };
        let owner = UserId(row.try_get("user_id")?);
        let current: String = row.try_get("status")?;
        let current = OrderStatus::parse(&current)?;
        if current.is_terminal() {
            debug!(order = %number, status = %current, "verdict ignored: already terminal");
            return Ok(ApplyOutcome::AlreadyTerminal(current));
        }

        sqlx::query(
            r#"
            update orders
            set status = $2,
                accrual_micros = $3
            where number = $1
            "#,
        )
        .bind(number.as_str())
        .bind(verdict.status().as_str())
        .bind(verdict.accrual().map(Points::micros))
        .execute(&mut *tx)
        .await
        .context("apply_verdict status update failed")?;

        let credited = match verdict {
            TerminalVerdict::Processed(amount) => {
                ledger::credit(&mut *tx, owner, amount).await?;
                amount
            }
            TerminalVerdict::Invalid => Points::ZERO,
        };

        tx.commit().await.context("apply_verdict commit failed")?;
        Ok(ApplyOutcome::Applied { owner, credited })
    }

    async fn withdraw(
        &self,
        owner: UserId,
        number: &OrderNumber,
        sum: Points,
    ) -> Result<WithdrawOutcome> {
        let mut tx = self.pool.begin().await.context("begin tx failed")?;

        match ledger::debit(&mut *tx, owner, sum).await? {
            DebitOutcome::Debited(_) => {}
            DebitOutcome::Refused(LedgerError::InsufficientFunds { current, .. }) => {
                return Ok(WithdrawOutcome::InsufficientFunds { current });
            }
            DebitOutcome::Refused(e) => bail!("withdraw refused for user {owner}: {e}"),
        }

        let row = sqlx::query(
            r#"
            insert into withdrawals (user_id, number, sum_micros)
            values ($1, $2, $3)
            returning withdrawal_id, user_id, number, sum_micros, processed_at
            "#,
        )
        .bind(owner.0)
        .bind(number.as_str())
        .bind(sum.micros())
        .fetch_one(&mut *tx)
        .await
        .context("withdrawal insert failed")?;
        let withdrawal = withdrawal_from_row(&row)?;

        tx.commit().await.context("withdraw commit failed")?;
        Ok(WithdrawOutcome::Completed(withdrawal))
    }

    async fn status(&self) -> Result<DbStatus> {
        crate::status(&self.pool).await
    }
}
