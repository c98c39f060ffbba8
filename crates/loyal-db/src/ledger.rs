//! Ledger Manager, Postgres side.
//!
//! Both operations take a connection that is already inside a transaction and
//! never commit themselves: the caller's transaction is the atomic unit
//! (status + credit, or debit + withdrawal record). The balance row is
//! created on first touch and then locked with `FOR UPDATE`, so concurrent
//! credits and debits for one user serialise on that row. The arithmetic is
//! `Balance::credit` / `Balance::debit`.

use anyhow::{Context, Result};
use loyal_schemas::{Balance, LedgerError, Points, UserId};
use sqlx::{PgConnection, Row};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited(Balance),
    /// The rule refused the debit; the row was not written.
    Refused(LedgerError),
}

/// Ensure the balance row exists and lock it for the rest of the transaction.
pub async fn lock_balance(conn: &mut PgConnection, owner: UserId) -> Result<Balance> {
    sqlx::query(
        r#"
        insert into balances (user_id)
        values ($1)
        on conflict (user_id) do nothing
        "#,
    )
    .bind(owner.0)
    .execute(&mut *conn)
    .await
    .context("balance upsert failed")?;

    let row = sqlx::query(
        r#"
        select current_micros, withdrawn_micros
        from balances
        where user_id = $1
        for update
        "#,
    )
    .bind(owner.0)
    .fetch_one(&mut *conn)
    .await
    .context("balance lock failed")?;

    Ok(Balance {
        owner,
        current: Points::new(row.try_get("current_micros")?),
        withdrawn: Points::new(row.try_get("withdrawn_micros")?),
    })
}

async fn store_balance(conn: &mut PgConnection, b: &Balance) -> Result<()> {
    sqlx::query(
        r#"
        update balances
        set current_micros = $2,
            withdrawn_micros = $3
        where user_id = $1
        "#,
    )
    .bind(b.owner.0)
    .bind(b.current.micros())
    .bind(b.withdrawn.micros())
    .execute(&mut *conn)
    .await
    .context("balance update failed")?;
    Ok(())
}

/// Increase `current` by `amount` (>= 0). Does not deduplicate; the caller's
/// transaction decides whether a credit is due.
pub async fn credit(conn: &mut PgConnection, owner: UserId, amount: Points) -> Result<Balance> {
    let mut b = lock_balance(conn, owner).await?;
    b.credit(amount)
        .with_context(|| format!("credit refused for user {owner}"))?;
    store_balance(conn, &b).await?;
    Ok(b)
}

/// Move `amount` from `current` to `withdrawn` if funds suffice.
pub async fn debit(conn: &mut PgConnection, owner: UserId, amount: Points) -> Result<DebitOutcome> {
    let mut b = lock_balance(conn, owner).await?;
    if let Err(e) = b.debit(amount) {
        return Ok(DebitOutcome::Refused(e));
    }
    store_balance(conn, &b).await?;
    Ok(DebitOutcome::Debited(b))
}
