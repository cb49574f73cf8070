use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub mod accounts;
pub mod files;
pub mod instructions;
pub mod intake;
pub mod outbox;

pub use accounts::{account_available, account_release, account_reserve, account_settle, AccountRow};
pub use files::{FileRow, NewFile};
pub use instructions::NewInstruction;
#[cfg(feature = "runtime-claim")]
pub use outbox::{outbox_claim_batch, ClaimedJob};
pub use outbox::{JobKind, outbox_enqueue, outbox_mark_done, outbox_release_stale_claims};

pub const ENV_DB_URL: &str = "MPE_DATABASE_URL";

/// Stable error sentinels. Guarded single-statement updates surface their
/// refusals as these prefixes; callers match on them rather than on SQL
/// error detail.
pub mod sentinel {
    pub const INSUFFICIENT_FUNDS: &str = "INSUFFICIENT_FUNDS";
    pub const OVER_RELEASE: &str = "OVER_RELEASE";
    pub const OVER_SETTLE: &str = "OVER_SETTLE";
    pub const UNKNOWN_ACCOUNT: &str = "UNKNOWN_ACCOUNT";
    pub const STALE_TRANSITION: &str = "STALE_TRANSITION";
}

/// `true` when `err` is the reservation-time shortfall. The approval flow
/// maps this to a denial that leaves the file `awaiting_approval`.
pub fn is_insufficient_funds(err: &anyhow::Error) -> bool {
    format!("{err:#}").contains(sentinel::INSUFFICIENT_FUNDS)
}

/// `true` when a guarded status update found the row in a different state —
/// a concurrent writer won; the caller's view is stale.
pub fn is_stale_transition(err: &anyhow::Error) -> bool {
    format!("{err:#}").contains(sentinel::STALE_TRANSITION)
}

/// Connect to Postgres using MPE_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='payment_files'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_files_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_files_table: bool,
}

/// Count files currently mid-execution. CLI guardrails use this to refuse
/// migration of a database with in-flight settlements.
pub async fn count_processing_files(pool: &PgPool) -> Result<i64> {
    let st = status(pool).await?;
    if !st.has_files_table {
        return Ok(0);
    }

    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from payment_files
        where status = 'processing' and not deleted
        "#,
    )
    .fetch_one(pool)
    .await
    .context("count_processing_files failed")?;

    Ok(n)
}

/// Detect a Postgres unique constraint violation by name.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint)
                || db_err.code().as_deref() == Some("23505")
                    && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}
