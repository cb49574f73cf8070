//! Instruction persistence: batch insert at validation time, pending-row
//! fetch for execution, and the per-chunk terminal commit.

use anyhow::{anyhow, Context, Result};
use mpe_ledger::Amount;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewInstruction {
    pub instruction_id: Uuid,
    pub row_ordinal: i32,
    pub beneficiary_id: Uuid,
    pub amount_micros: i64,
    pub currency: String,
    pub purpose_code: Option<String>,
    pub invoice_number: Option<String>,
}

/// Insert a validated batch. Row ordinals are unique per file
/// (`uq_instruction_file_ordinal`); a duplicate here is an upstream defect
/// and fails the whole transaction.
pub async fn insert_instructions(
    tx: &mut Transaction<'_, Postgres>,
    file_id: Uuid,
    instructions: &[NewInstruction],
) -> Result<()> {
    for ins in instructions {
        sqlx::query(
            r#"
            insert into payment_instructions (
              instruction_id, file_id, row_ordinal, beneficiary_id,
              amount_micros, currency, purpose_code, invoice_number
            ) values ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(ins.instruction_id)
        .bind(file_id)
        .bind(ins.row_ordinal)
        .bind(ins.beneficiary_id)
        .bind(ins.amount_micros)
        .bind(&ins.currency)
        .bind(&ins.purpose_code)
        .bind(&ins.invoice_number)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("insert instruction ordinal {}", ins.row_ordinal))?;
    }
    Ok(())
}

/// A pending row as the orchestrator consumes it.
#[derive(Debug, Clone)]
pub struct PendingInstruction {
    pub instruction_id: Uuid,
    pub row_ordinal: i32,
    pub beneficiary_id: Uuid,
    pub amount: Amount,
    pub currency: String,
    pub purpose_code: Option<String>,
}

/// The file's `pending` rows in ordinal order.
pub async fn fetch_pending_instructions(
    pool: &PgPool,
    file_id: Uuid,
) -> Result<Vec<PendingInstruction>> {
    let rows = sqlx::query(
        r#"
        select instruction_id, row_ordinal, beneficiary_id, amount_micros,
               currency, purpose_code
        from payment_instructions
        where file_id = $1 and status = 'pending'
        order by row_ordinal
        "#,
    )
    .bind(file_id)
    .fetch_all(pool)
    .await
    .context("fetch_pending_instructions failed")?;

    rows.into_iter()
        .map(|r| {
            let micros: i64 = r.try_get("amount_micros")?;
            Ok(PendingInstruction {
                instruction_id: r.try_get("instruction_id")?,
                row_ordinal: r.try_get("row_ordinal")?,
                beneficiary_id: r.try_get("beneficiary_id")?,
                amount: Amount::from_micros(micros)
                    .ok_or_else(|| anyhow!("negative amount_micros {micros}"))?,
                currency: r.try_get("currency")?,
                purpose_code: r.try_get("purpose_code")?,
            })
        })
        .collect()
}

/// One terminal instruction write inside a chunk transaction. Settled rows
/// record the rail's external reference; failed rows record the reason.
pub async fn mark_instruction_terminal(
    tx: &mut Transaction<'_, Postgres>,
    instruction_id: Uuid,
    settled: bool,
    external_ref: Option<&str>,
    failure_reason: Option<&str>,
) -> Result<()> {
    let res = sqlx::query(
        r#"
        update payment_instructions
        set status = case when $2 then 'completed' else 'failed' end,
            external_ref = $3,
            failure_reason = $4,
            updated_at_utc = now()
        where instruction_id = $1 and status = 'pending'
        "#,
    )
    .bind(instruction_id)
    .bind(settled)
    .bind(external_ref)
    .bind(failure_reason)
    .execute(&mut **tx)
    .await
    .context("mark_instruction_terminal failed")?;

    if res.rows_affected() == 0 {
        // Already terminal: the chunk was committed by a prior run after a
        // crash. The rail contract is idempotent per instruction id, so
        // skipping is correct.
        return Ok(());
    }
    Ok(())
}
