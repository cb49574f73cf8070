//! Persisted funding-account ledger operations.
//!
//! Each operation is a single guarded UPDATE: the guard re-checks the
//! balance invariant inside the statement, so concurrent reservations
//! against one account serialize at the row — never at the file level —
//! and `available >= 0` holds no matter how many workers race. A guard
//! that matches zero rows becomes a sentinel error (see `crate::sentinel`).
//!
//! All functions take `impl PgExecutor` so they compose into the approval
//! and chunk-commit transactions.

use anyhow::{anyhow, bail, Context, Result};
use mpe_ledger::Amount;
use sqlx::postgres::PgExecutor;
use sqlx::Row;
use uuid::Uuid;

use crate::sentinel;

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub account_id: Uuid,
    pub client_id: Uuid,
    pub currency: String,
    pub balance_micros: i64,
    pub reserved_micros: i64,
}

impl AccountRow {
    pub fn available_micros(&self) -> i64 {
        self.balance_micros - self.reserved_micros
    }
}

pub async fn insert_account<'e, E: PgExecutor<'e>>(
    ex: E,
    account_id: Uuid,
    client_id: Uuid,
    currency: &str,
    opening_balance: Amount,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into funding_accounts (account_id, client_id, currency, balance_micros)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(account_id)
    .bind(client_id)
    .bind(currency)
    .bind(opening_balance.micros())
    .execute(ex)
    .await
    .context("insert_account failed")?;
    Ok(())
}

pub async fn fetch_account<'e, E: PgExecutor<'e>>(ex: E, account_id: Uuid) -> Result<AccountRow> {
    let row = sqlx::query(
        r#"
        select account_id, client_id, currency, balance_micros, reserved_micros
        from funding_accounts
        where account_id = $1
        "#,
    )
    .bind(account_id)
    .fetch_optional(ex)
    .await
    .context("fetch_account failed")?
    .ok_or_else(|| anyhow!("{} {account_id}", sentinel::UNKNOWN_ACCOUNT))?;

    Ok(AccountRow {
        account_id: row.try_get("account_id")?,
        client_id: row.try_get("client_id")?,
        currency: row.try_get("currency")?,
        balance_micros: row.try_get("balance_micros")?,
        reserved_micros: row.try_get("reserved_micros")?,
    })
}

/// Convenience: available = balance − reserved.
pub async fn account_available<'e, E: PgExecutor<'e>>(ex: E, account_id: Uuid) -> Result<Amount> {
    let acct = fetch_account(ex, account_id).await?;
    Ok(Amount::from_micros(acct.available_micros()).unwrap_or(Amount::ZERO))
}

/// Move `amount` from available to reserved.
///
/// The WHERE clause is the guard: it only matches while
/// `balance − reserved >= amount`, so two racing reservations can never
/// jointly oversubscribe the account.
pub async fn account_reserve<'e, E: PgExecutor<'e>>(
    ex: E,
    account_id: Uuid,
    amount: Amount,
) -> Result<()> {
    let res = sqlx::query(
        r#"
        update funding_accounts
        set reserved_micros = reserved_micros + $2
        where account_id = $1
          and balance_micros - reserved_micros >= $2
        "#,
    )
    .bind(account_id)
    .bind(amount.micros())
    .execute(ex)
    .await
    .context("account_reserve update failed")?;

    if res.rows_affected() == 0 {
        bail!(
            "{} account {account_id} cannot reserve {amount}",
            sentinel::INSUFFICIENT_FUNDS
        );
    }
    Ok(())
}

/// Move `amount` from reserved back to available.
pub async fn account_release<'e, E: PgExecutor<'e>>(
    ex: E,
    account_id: Uuid,
    amount: Amount,
) -> Result<()> {
    let res = sqlx::query(
        r#"
        update funding_accounts
        set reserved_micros = reserved_micros - $2
        where account_id = $1
          and reserved_micros >= $2
        "#,
    )
    .bind(account_id)
    .bind(amount.micros())
    .execute(ex)
    .await
    .context("account_release update failed")?;

    if res.rows_affected() == 0 {
        bail!(
            "{} account {account_id} cannot release {amount}",
            sentinel::OVER_RELEASE
        );
    }
    Ok(())
}

/// Final debit: reduce both balance and reserved by `amount`.
pub async fn account_settle<'e, E: PgExecutor<'e>>(
    ex: E,
    account_id: Uuid,
    amount: Amount,
) -> Result<()> {
    let res = sqlx::query(
        r#"
        update funding_accounts
        set balance_micros = balance_micros - $2,
            reserved_micros = reserved_micros - $2
        where account_id = $1
          and reserved_micros >= $2
        "#,
    )
    .bind(account_id)
    .bind(amount.micros())
    .execute(ex)
    .await
    .context("account_settle update failed")?;

    if res.rows_affected() == 0 {
        bail!(
            "{} account {account_id} cannot settle {amount}",
            sentinel::OVER_SETTLE
        );
    }
    Ok(())
}
