//! Operational sweeps: stuck files and orphaned claims.
//!
//! A `processing` file past its wall-clock deadline is flagged for operator
//! intervention — never auto-retried — and a claim whose worker died is
//! returned to the queue after the TTL.

use anyhow::Result;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

/// Flag over-deadline processing files. Returns the newly flagged ids.
pub async fn scan_stuck_files(pool: &PgPool) -> Result<Vec<Uuid>> {
    let flagged = mpe_db::files::flag_stuck_processing(pool).await?;
    for file_id in &flagged {
        warn!(%file_id, "file stuck in processing past its deadline; operator intervention required");
    }
    Ok(flagged)
}

/// Return stale outbox claims to the queue. Returns how many were released.
pub async fn recover_stale_claims(pool: &PgPool, ttl_secs: i64) -> Result<u64> {
    let released = mpe_db::outbox_release_stale_claims(pool, ttl_secs).await?;
    if released > 0 {
        warn!(released, "returned stale outbox claims to the queue");
    }
    Ok(released)
}
