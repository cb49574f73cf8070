//! Durable work queue.
//!
//! Jobs (`validate_file`, `execute_file`) are rows; workers claim batches
//! with `FOR UPDATE SKIP LOCKED`, so two workers never dispatch the same
//! job. The partial unique index `uq_outbox_active_job` keeps at most one
//! live job per (file, kind) — the foundation of the per-file execution
//! lease.
//!
//! `outbox_claim_batch` is feature-gated (`runtime-claim`): the runtime
//! worker crate is the only production dispatcher, enforced at compile time.

use anyhow::{anyhow, Context, Result};
use sqlx::postgres::PgExecutor;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::is_unique_constraint_violation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    ValidateFile,
    ExecuteFile,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ValidateFile => "validate_file",
            JobKind::ExecuteFile => "execute_file",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "validate_file" => Ok(JobKind::ValidateFile),
            "execute_file" => Ok(JobKind::ExecuteFile),
            other => Err(anyhow!("invalid job kind: {other}")),
        }
    }
}

/// Enqueue a job. Returns the new outbox id, or `None` when an identical
/// live job already exists (idempotent enqueue).
pub async fn outbox_enqueue<'e, E: PgExecutor<'e>>(
    ex: E,
    kind: JobKind,
    file_id: Uuid,
) -> Result<Option<i64>> {
    let res = sqlx::query(
        r#"
        insert into work_outbox (kind, file_id)
        values ($1, $2)
        returning outbox_id
        "#,
    )
    .bind(kind.as_str())
    .bind(file_id)
    .fetch_one(ex)
    .await;

    match res {
        Ok(row) => Ok(Some(row.try_get("outbox_id")?)),
        Err(e) => {
            if is_unique_constraint_violation(&e, "uq_outbox_active_job") {
                return Ok(None);
            }
            Err(anyhow::Error::new(e).context("outbox_enqueue failed"))
        }
    }
}

/// Enqueue inside an open transaction (the approval path).
pub async fn outbox_enqueue_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    kind: JobKind,
    file_id: Uuid,
) -> Result<Option<i64>> {
    outbox_enqueue(&mut **tx, kind, file_id).await
}

/// A claimed job row — the provenance for an execution claim token.
#[cfg(feature = "runtime-claim")]
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub outbox_id: i64,
    pub kind: JobKind,
    pub file_id: Uuid,
}

/// Claim up to `limit` unclaimed jobs for `worker_id`. Skip-locked row
/// selection: concurrent workers each get disjoint batches.
#[cfg(feature = "runtime-claim")]
pub async fn outbox_claim_batch(
    pool: &PgPool,
    worker_id: &str,
    limit: i64,
) -> Result<Vec<ClaimedJob>> {
    let rows = sqlx::query(
        r#"
        update work_outbox
        set claimed_at_utc = now(), claimed_by = $2
        where outbox_id in (
            select outbox_id
            from work_outbox
            where claimed_at_utc is null and done_at_utc is null
            order by outbox_id
            limit $1
            for update skip locked
        )
        returning outbox_id, kind, file_id
        "#,
    )
    .bind(limit)
    .bind(worker_id)
    .fetch_all(pool)
    .await
    .context("outbox_claim_batch failed")?;

    rows.into_iter()
        .map(|r| {
            Ok(ClaimedJob {
                outbox_id: r.try_get("outbox_id")?,
                kind: JobKind::parse(&r.try_get::<String, _>("kind")?)?,
                file_id: r.try_get("file_id")?,
            })
        })
        .collect()
}

/// Mark a claimed job finished.
pub async fn outbox_mark_done<'e, E: PgExecutor<'e>>(ex: E, outbox_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        update work_outbox
        set done_at_utc = now()
        where outbox_id = $1
        "#,
    )
    .bind(outbox_id)
    .execute(ex)
    .await
    .context("outbox_mark_done failed")?;
    Ok(())
}

/// Recovery: un-claim jobs whose worker died mid-flight. A claim older than
/// `ttl_secs` with no completion is returned to the queue. Returns how many
/// were released.
pub async fn outbox_release_stale_claims(pool: &PgPool, ttl_secs: i64) -> Result<u64> {
    if ttl_secs <= 0 {
        return Err(anyhow!("stale-claim ttl_secs must be > 0"));
    }
    let res = sqlx::query(
        r#"
        update work_outbox
        set claimed_at_utc = null, claimed_by = null
        where done_at_utc is null
          and claimed_at_utc is not null
          and claimed_at_utc < now() - make_interval(secs => $1::double precision)
        "#,
    )
    .bind(ttl_secs as f64)
    .execute(pool)
    .await
    .context("outbox_release_stale_claims failed")?;

    Ok(res.rows_affected())
}
