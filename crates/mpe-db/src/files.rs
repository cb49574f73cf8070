//! Payment file persistence: inserts, guarded status transitions, the
//! approval transaction, and the data-retrieval queries.
//!
//! Status writes always name the state they expect to leave; a guarded
//! update that matches zero rows means a concurrent writer got there first
//! and surfaces as a `STALE_TRANSITION` sentinel, leaving the row in its
//! prior valid state.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use mpe_ledger::Amount;
use mpe_lifecycle::{FileStatus, InstructionStatus};
use sqlx::postgres::PgExecutor;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::accounts::account_reserve;
use crate::instructions::{insert_instructions, NewInstruction};
use crate::outbox::{outbox_enqueue_in_tx, JobKind};
use crate::sentinel;

#[derive(Debug, Clone)]
pub struct NewFile {
    pub file_id: Uuid,
    pub client_id: Uuid,
    pub funding_account_id: Uuid,
    pub currency: String,
    pub total_micros: i64,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct FileRow {
    pub file_id: Uuid,
    pub client_id: Uuid,
    pub funding_account_id: Uuid,
    pub currency: String,
    pub total_micros: i64,
    pub status: FileStatus,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub approved_at_utc: Option<DateTime<Utc>>,
    pub row_count: i32,
    pub valid_count: i32,
    pub error_count: i32,
    pub deleted: bool,
    pub version: i64,
    pub flagged_stuck: bool,
}

pub async fn insert_file<'e, E: PgExecutor<'e>>(ex: E, file: &NewFile) -> Result<()> {
    sqlx::query(
        r#"
        insert into payment_files (
          file_id, client_id, funding_account_id, currency, total_micros, created_by
        ) values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(file.file_id)
    .bind(file.client_id)
    .bind(file.funding_account_id)
    .bind(file.currency.as_str())
    .bind(file.total_micros)
    .bind(file.created_by)
    .execute(ex)
    .await
    .context("insert_file failed")?;
    Ok(())
}

pub async fn fetch_file<'e, E: PgExecutor<'e>>(ex: E, file_id: Uuid) -> Result<FileRow> {
    let row = sqlx::query(
        r#"
        select
          file_id, client_id, funding_account_id, currency, total_micros,
          status, created_by, approved_by, approved_at_utc,
          row_count, valid_count, error_count, deleted, version, flagged_stuck
        from payment_files
        where file_id = $1
        "#,
    )
    .bind(file_id)
    .fetch_one(ex)
    .await
    .context("fetch_file failed")?;

    file_row_from(row)
}

fn file_row_from(row: sqlx::postgres::PgRow) -> Result<FileRow> {
    Ok(FileRow {
        file_id: row.try_get("file_id")?,
        client_id: row.try_get("client_id")?,
        funding_account_id: row.try_get("funding_account_id")?,
        currency: row.try_get("currency")?,
        total_micros: row.try_get("total_micros")?,
        status: FileStatus::parse(&row.try_get::<String, _>("status")?)
            .map_err(|e| anyhow!("{e}"))?,
        created_by: row.try_get("created_by")?,
        approved_by: row.try_get("approved_by")?,
        approved_at_utc: row.try_get("approved_at_utc")?,
        row_count: row.try_get("row_count")?,
        valid_count: row.try_get("valid_count")?,
        error_count: row.try_get("error_count")?,
        deleted: row.try_get("deleted")?,
        version: row.try_get("version")?,
        flagged_stuck: row.try_get("flagged_stuck")?,
    })
}

/// Guarded status write: `from → to`, bumping the optimistic version.
/// Zero affected rows means the file was not in `from` — the caller's view
/// is stale and nothing changed.
pub async fn update_file_status<'e, E: PgExecutor<'e>>(
    ex: E,
    file_id: Uuid,
    from: FileStatus,
    to: FileStatus,
) -> Result<()> {
    let res = sqlx::query(
        r#"
        update payment_files
        set status = $3,
            version = version + 1,
            updated_at_utc = now()
        where file_id = $1 and status = $2 and not deleted
        "#,
    )
    .bind(file_id)
    .bind(from.as_str())
    .bind(to.as_str())
    .execute(ex)
    .await
    .context("update_file_status failed")?;

    if res.rows_affected() == 0 {
        bail!(
            "{} file {file_id} not in {} (wanted {})",
            sentinel::STALE_TRANSITION,
            from.as_str(),
            to.as_str()
        );
    }
    Ok(())
}

/// Persist a successful validation in one transaction: instructions,
/// summary counts, and the `validating → awaiting_approval` status write.
pub async fn apply_validation_success(
    pool: &PgPool,
    file_id: Uuid,
    instructions: &[NewInstruction],
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin validation tx")?;

    insert_instructions(&mut tx, file_id, instructions).await?;

    sqlx::query(
        r#"
        update payment_files
        set row_count = $2, valid_count = $2, error_count = 0
        where file_id = $1
        "#,
    )
    .bind(file_id)
    .bind(instructions.len() as i32)
    .execute(&mut *tx)
    .await
    .context("update validation counts failed")?;

    update_file_status(
        &mut *tx,
        file_id,
        FileStatus::Validating,
        FileStatus::AwaitingApproval,
    )
    .await?;

    tx.commit().await.context("commit validation tx")?;
    Ok(())
}

/// Persist a failed validation: row errors, counts, and the
/// `validating → validation_failed` status write, in one transaction.
pub async fn apply_validation_failure(
    pool: &PgPool,
    file_id: Uuid,
    total_rows: i32,
    valid_rows: i32,
    errors: &[(i32, String, String, String)],
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin validation-failure tx")?;

    for (row_number, field, code, message) in errors {
        sqlx::query(
            r#"
            insert into file_row_errors (file_id, row_number, field, code, message)
            values ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(file_id)
        .bind(row_number)
        .bind(field)
        .bind(code)
        .bind(message)
        .execute(&mut *tx)
        .await
        .context("insert row error failed")?;
    }

    sqlx::query(
        r#"
        update payment_files
        set row_count = $2, valid_count = $3, error_count = $4
        where file_id = $1
        "#,
    )
    .bind(file_id)
    .bind(total_rows)
    .bind(valid_rows)
    .bind(total_rows - valid_rows)
    .execute(&mut *tx)
    .await
    .context("update validation counts failed")?;

    update_file_status(
        &mut *tx,
        file_id,
        FileStatus::Validating,
        FileStatus::ValidationFailed,
    )
    .await?;

    tx.commit().await.context("commit validation-failure tx")?;
    Ok(())
}

/// The fields of an approval decision as persisted.
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub approval_id: Uuid,
    pub file_id: Uuid,
    pub decided_by: Uuid,
    pub decided_at_utc: DateTime<Utc>,
    /// approved | partially_approved | denied
    pub outcome: String,
    pub tier_limit_micros: Option<i64>,
    pub denial_code: Option<String>,
}

pub async fn insert_approval<'e, E: PgExecutor<'e>>(ex: E, a: &NewApproval) -> Result<()> {
    sqlx::query(
        r#"
        insert into approvals (
          approval_id, file_id, decided_by, decided_at_utc, outcome,
          tier_limit_micros, denial_code
        ) values ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(a.approval_id)
    .bind(a.file_id)
    .bind(a.decided_by)
    .bind(a.decided_at_utc)
    .bind(&a.outcome)
    .bind(a.tier_limit_micros)
    .bind(&a.denial_code)
    .execute(ex)
    .await
    .context("insert_approval failed")?;
    Ok(())
}

/// Prior non-denied approvals on a file (dual-approval bookkeeping).
pub async fn fetch_prior_approvers<'e, E: PgExecutor<'e>>(
    ex: E,
    file_id: Uuid,
) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        r#"
        select decided_by
        from approvals
        where file_id = $1 and outcome in ('approved','partially_approved')
        order by decided_at_utc
        "#,
    )
    .bind(file_id)
    .fetch_all(ex)
    .await
    .context("fetch_prior_approvers failed")?;

    rows.into_iter()
        .map(|r| r.try_get("decided_by").context("decided_by column"))
        .collect()
}

/// The completing-approval transaction: status write, reservation, decision
/// record, and execution-job enqueue commit together — a crash can never
/// leave funds reserved without an enqueued approved file, nor vice versa.
///
/// On `INSUFFICIENT_FUNDS` the transaction rolls back and the file remains
/// `awaiting_approval` (or `partially_approved`).
pub async fn approve_file_tx(
    pool: &PgPool,
    file_id: Uuid,
    from: FileStatus,
    approval: &NewApproval,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin approval tx")?;

    // Row lock so the status re-check and reservation see a stable file.
    let row = sqlx::query(
        r#"
        select funding_account_id, total_micros, status
        from payment_files
        where file_id = $1 and not deleted
        for update
        "#,
    )
    .bind(file_id)
    .fetch_optional(&mut *tx)
    .await
    .context("lock file for approval failed")?
    .ok_or_else(|| anyhow!("approve: file {file_id} not found"))?;

    let account_id: Uuid = row.try_get("funding_account_id")?;
    let total_micros: i64 = row.try_get("total_micros")?;
    let status = FileStatus::parse(&row.try_get::<String, _>("status")?)
        .map_err(|e| anyhow!("{e}"))?;
    if status != from {
        bail!(
            "{} file {file_id} moved to {} during approval",
            sentinel::STALE_TRANSITION,
            status.as_str()
        );
    }

    let total = Amount::from_micros(total_micros)
        .ok_or_else(|| anyhow!("file {file_id} has negative total"))?;
    account_reserve(&mut *tx, account_id, total).await?;

    sqlx::query(
        r#"
        update payment_files
        set status = 'approved',
            approved_by = $2,
            approved_at_utc = $3,
            version = version + 1,
            updated_at_utc = now()
        where file_id = $1
        "#,
    )
    .bind(file_id)
    .bind(approval.decided_by)
    .bind(approval.decided_at_utc)
    .execute(&mut *tx)
    .await
    .context("approval status write failed")?;

    insert_approval(&mut *tx, approval).await?;
    outbox_enqueue_in_tx(&mut tx, JobKind::ExecuteFile, file_id).await?;

    tx.commit().await.context("commit approval tx")?;
    Ok(())
}

/// First-of-two approval: records the decision and parks the file in
/// `partially_approved`. No funds move.
pub async fn partially_approve_file_tx(
    pool: &PgPool,
    file_id: Uuid,
    approval: &NewApproval,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin partial-approval tx")?;

    update_file_status(
        &mut *tx,
        file_id,
        FileStatus::AwaitingApproval,
        FileStatus::PartiallyApproved,
    )
    .await?;
    insert_approval(&mut *tx, approval).await?;

    tx.commit().await.context("commit partial-approval tx")?;
    Ok(())
}

/// Stamp the execution deadline when a file enters `processing`.
pub async fn set_processing_deadline<'e, E: PgExecutor<'e>>(
    ex: E,
    file_id: Uuid,
    timeout_secs: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        update payment_files
        set processing_deadline_utc = now() + make_interval(secs => $2::double precision)
        where file_id = $1
        "#,
    )
    .bind(file_id)
    .bind(timeout_secs as f64)
    .execute(ex)
    .await
    .context("set_processing_deadline failed")?;
    Ok(())
}

/// Flag files stuck in `processing` past their deadline for operator
/// intervention. Returns the ids newly flagged. Never auto-retries.
pub async fn flag_stuck_processing(pool: &PgPool) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        r#"
        update payment_files
        set flagged_stuck = true, updated_at_utc = now()
        where status = 'processing'
          and not flagged_stuck
          and processing_deadline_utc is not null
          and processing_deadline_utc < now()
        returning file_id
        "#,
    )
    .fetch_all(pool)
    .await
    .context("flag_stuck_processing failed")?;

    rows.into_iter()
        .map(|r| r.try_get("file_id").context("file_id column"))
        .collect()
}

/// Soft-delete, permitted only from draft / validation_failed / cancelled;
/// instruction rows cascade on the hard delete path, soft delete keeps them
/// for audit.
pub async fn soft_delete_file(pool: &PgPool, file_id: Uuid, client_id: Uuid) -> Result<()> {
    let res = sqlx::query(
        r#"
        update payment_files
        set deleted = true, version = version + 1, updated_at_utc = now()
        where file_id = $1
          and client_id = $2
          and status in ('draft','validation_failed','cancelled')
          and not deleted
        "#,
    )
    .bind(file_id)
    .bind(client_id)
    .execute(pool)
    .await
    .context("soft_delete_file failed")?;

    if res.rows_affected() == 0 {
        bail!(
            "{} file {file_id} is not deletable in its current state",
            sentinel::STALE_TRANSITION
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Data-retrieval queries
// ---------------------------------------------------------------------------

/// Files awaiting (or mid-) approval for a tenant.
pub async fn list_files_awaiting_approval(pool: &PgPool, client_id: Uuid) -> Result<Vec<FileRow>> {
    let rows = sqlx::query(
        r#"
        select
          file_id, client_id, funding_account_id, currency, total_micros,
          status, created_by, approved_by, approved_at_utc,
          row_count, valid_count, error_count, deleted, version, flagged_stuck
        from payment_files
        where client_id = $1
          and status in ('awaiting_approval','partially_approved')
          and not deleted
        order by created_at_utc
        "#,
    )
    .bind(client_id)
    .fetch_all(pool)
    .await
    .context("list_files_awaiting_approval failed")?;

    rows.into_iter().map(file_row_from).collect()
}

/// Per-row validation errors for a file, in row order.
pub async fn fetch_row_errors(
    pool: &PgPool,
    file_id: Uuid,
) -> Result<Vec<(i32, String, String, String)>> {
    let rows = sqlx::query(
        r#"
        select row_number, field, code, message
        from file_row_errors
        where file_id = $1
        order by row_number
        "#,
    )
    .bind(file_id)
    .fetch_all(pool)
    .await
    .context("fetch_row_errors failed")?;

    rows.into_iter()
        .map(|r| {
            Ok((
                r.try_get("row_number")?,
                r.try_get("field")?,
                r.try_get("code")?,
                r.try_get("message")?,
            ))
        })
        .collect()
}

/// Terminal instruction tallies for a file: (completed, failed, cancelled).
pub async fn instruction_outcome_counts(pool: &PgPool, file_id: Uuid) -> Result<(i64, i64, i64)> {
    let row = sqlx::query(
        r#"
        select
          count(*) filter (where status = 'completed')::bigint as completed,
          count(*) filter (where status = 'failed')::bigint    as failed,
          count(*) filter (where status = 'cancelled')::bigint as cancelled
        from payment_instructions
        where file_id = $1
        "#,
    )
    .bind(file_id)
    .fetch_one(pool)
    .await
    .context("instruction_outcome_counts failed")?;

    Ok((
        row.try_get("completed")?,
        row.try_get("failed")?,
        row.try_get("cancelled")?,
    ))
}

/// Beneficiaries for a tenant filtered by currency.
pub async fn list_beneficiaries_by_currency(
    pool: &PgPool,
    client_id: Uuid,
    currency: &str,
) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        r#"
        select beneficiary_id
        from beneficiaries
        where client_id = $1 and currency = $2
        order by display_name
        "#,
    )
    .bind(client_id)
    .bind(currency)
    .fetch_all(pool)
    .await
    .context("list_beneficiaries_by_currency failed")?;

    rows.into_iter()
        .map(|r| r.try_get("beneficiary_id").context("beneficiary_id column"))
        .collect()
}

/// Oldest age of a still-unflagged processing file, for monitoring.
pub async fn oldest_processing_age(pool: &PgPool) -> Result<Option<Duration>> {
    let row = sqlx::query(
        r#"
        select min(updated_at_utc) as oldest
        from payment_files
        where status = 'processing' and not deleted
        "#,
    )
    .fetch_one(pool)
    .await
    .context("oldest_processing_age failed")?;

    let oldest: Option<DateTime<Utc>> = row.try_get("oldest")?;
    Ok(oldest.map(|t| Utc::now().signed_duration_since(t)))
}

/// Cancel a file pre-`processing`, cascading `cancelled` to its pending
/// instructions and releasing any reservation an `approved` file held.
pub async fn cancel_file_tx(pool: &PgPool, file_id: Uuid, client_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await.context("begin cancel tx")?;

    let row = sqlx::query(
        r#"
        select funding_account_id, total_micros, status
        from payment_files
        where file_id = $1 and client_id = $2 and not deleted
        for update
        "#,
    )
    .bind(file_id)
    .bind(client_id)
    .fetch_optional(&mut *tx)
    .await
    .context("lock file for cancel failed")?
    .ok_or_else(|| anyhow!("cancel: file {file_id} not found"))?;

    let status = FileStatus::parse(&row.try_get::<String, _>("status")?)
        .map_err(|e| anyhow!("{e}"))?;
    let transition = mpe_lifecycle::cancel(
        status,
        Amount::from_micros(row.try_get::<i64, _>("total_micros")?).unwrap_or(Amount::ZERO),
    )
    .map_err(|e| anyhow!("{e}"))?;

    for effect in &transition.effects {
        if let mpe_lifecycle::Effect::ReleaseFunds { amount } = effect {
            let account_id: Uuid = row.try_get("funding_account_id")?;
            crate::accounts::account_release(&mut *tx, account_id, *amount).await?;
        }
    }

    update_file_status(&mut *tx, file_id, status, transition.next).await?;

    sqlx::query(
        r#"
        update payment_instructions
        set status = 'cancelled', updated_at_utc = now()
        where file_id = $1 and status = 'pending'
        "#,
    )
    .bind(file_id)
    .execute(&mut *tx)
    .await
    .context("cascade instruction cancel failed")?;

    tx.commit().await.context("commit cancel tx")?;
    Ok(())
}

/// Map an instruction status string through the lifecycle parser (guard for
/// values read back from SQL).
pub fn parse_instruction_status(s: &str) -> Result<InstructionStatus> {
    InstructionStatus::parse(s).map_err(|e| anyhow!("{e}"))
}
