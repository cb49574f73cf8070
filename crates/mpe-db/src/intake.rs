//! Durable intake rows + the upload transaction.
//!
//! Upload (the excluded collaborator) hands us a file header and its raw
//! rows; we persist both and enqueue the validate job in one transaction so
//! an accepted upload is always validated exactly once.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::files::{insert_file, NewFile};
use crate::outbox::{outbox_enqueue_in_tx, JobKind};

/// Persist a new file with its raw rows and enqueue validation.
pub async fn ingest_file_tx(
    pool: &PgPool,
    file: &NewFile,
    rows: &[(i32, Value)],
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin ingest tx")?;

    insert_file(&mut *tx, file).await?;

    for (row_number, fields) in rows {
        sqlx::query(
            r#"
            insert into intake_rows (file_id, row_number, fields)
            values ($1, $2, $3)
            "#,
        )
        .bind(file.file_id)
        .bind(row_number)
        .bind(fields)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("insert intake row {row_number}"))?;
    }

    outbox_enqueue_in_tx(&mut tx, JobKind::ValidateFile, file.file_id).await?;

    tx.commit().await.context("commit ingest tx")?;
    Ok(())
}

/// The file's raw rows in row order.
pub async fn fetch_intake_rows(pool: &PgPool, file_id: Uuid) -> Result<Vec<(i32, Value)>> {
    let rows = sqlx::query(
        r#"
        select row_number, fields
        from intake_rows
        where file_id = $1
        order by row_number
        "#,
    )
    .bind(file_id)
    .fetch_all(pool)
    .await
    .context("fetch_intake_rows failed")?;

    rows.into_iter()
        .map(|r| Ok((r.try_get("row_number")?, r.try_get("fields")?)))
        .collect()
}

/// Drop raw rows once validation has landed its verdict.
pub async fn delete_intake_rows(pool: &PgPool, file_id: Uuid) -> Result<()> {
    sqlx::query("delete from intake_rows where file_id = $1")
        .bind(file_id)
        .execute(pool)
        .await
        .context("delete_intake_rows failed")?;
    Ok(())
}
