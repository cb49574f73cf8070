use std::sync::Arc;

use mpe_approval::Approver;
use mpe_audit::DecisionLog;
use mpe_config::load_layered_yaml_from_strings;
use mpe_ledger::Amount;
use mpe_lifecycle::FileStatus;
use mpe_runtime::{approve_file, EngineState, PaperRail, Worker};
use serde_json::json;
use uuid::Uuid;

/// Full pipeline against a real database: upload → validate worker →
/// maker-checker approval (reserving funds) → execute worker → `completed`
/// with settled balances.
///
/// DB-backed test. Skips if MPE_DATABASE_URL is not set.
#[tokio::test(flavor = "multi_thread")]
async fn upload_to_completion() -> anyhow::Result<()> {
    let url = match std::env::var(mpe_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: MPE_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await?;
    mpe_db::migrate(&pool).await?;

    let units = |n: i64| Amount::from_units(n).unwrap();
    let client_id = Uuid::new_v4();
    let creator = Uuid::new_v4();
    let approver_id = Uuid::new_v4();

    let loaded = load_layered_yaml_from_strings(&[r#"
limits:
  - role: approver
    currency: USD
    limit: "2000.00"
execution:
  chunk_size: 2
  retry_max_attempts: 3
  retry_base_delay_ms: 1
  retry_max_delay_ms: 10
  processing_timeout_secs: 600
"#])?;
    let state = EngineState::from_loaded(&loaded)?;

    let tmp = tempfile::tempdir()?;
    let mut audit = DecisionLog::new(tmp.path().join("audit.jsonl"), true)?;

    // Funding account + beneficiaries.
    let account_id = Uuid::new_v4();
    mpe_db::accounts::insert_account(&pool, account_id, client_id, "USD", units(1_000)).await?;

    let ben = Uuid::new_v4();
    sqlx::query(
        "insert into beneficiaries (beneficiary_id, client_id, display_name, currency, swift_code, account_number)
         values ($1, $2, 'Acme Supplies', 'USD', 'CHASUS33', '12345678')",
    )
    .bind(ben)
    .bind(client_id)
    .execute(&pool)
    .await?;

    // Upload: 5 rows of 60.00 = 300.00 declared.
    let file_id = Uuid::new_v4();
    let rows: Vec<(i32, serde_json::Value)> = (1..=5)
        .map(|i| {
            (
                i,
                json!({
                    "beneficiary_id": ben.to_string(),
                    "amount": "60.00",
                    "swift_code": "CHASUS33",
                    "account_number": "12345678",
                }),
            )
        })
        .collect();
    mpe_db::intake::ingest_file_tx(
        &pool,
        &mpe_db::NewFile {
            file_id,
            client_id,
            funding_account_id: account_id,
            currency: "USD".to_string(),
            total_micros: units(300).micros(),
            created_by: creator,
        },
        &rows,
    )
    .await?;

    let worker = Worker::new(pool.clone(), state.clone(), Arc::new(PaperRail), "test-worker");

    // Validate job runs; file becomes awaiting_approval.
    worker.run_once(&mut audit, 10).await?;
    let file = mpe_db::files::fetch_file(&pool, file_id).await?;
    assert_eq!(file.status, FileStatus::AwaitingApproval);
    assert_eq!(file.valid_count, 5);

    // Creator cannot approve (maker-checker).
    let as_creator = Approver {
        user_id: creator,
        client_id,
        roles: vec!["approver".to_string()],
        limit_override: None,
    };
    let denied = approve_file(&pool, &mut audit, &state, &as_creator, file_id).await?;
    assert_eq!(denied.status, "denied");
    assert_eq!(denied.reason.as_deref(), Some("self_approval"));

    // A different approver within limit approves; funds reserve.
    let as_approver = Approver {
        user_id: approver_id,
        client_id,
        roles: vec!["approver".to_string()],
        limit_override: None,
    };
    let approved = approve_file(&pool, &mut audit, &state, &as_approver, file_id).await?;
    assert_eq!(approved.status, "approved");

    let acct = mpe_db::accounts::fetch_account(&pool, account_id).await?;
    assert_eq!(acct.reserved_micros, units(300).micros());

    // Execute job runs; everything settles through the paper rail.
    worker.run_once(&mut audit, 10).await?;

    let file = mpe_db::files::fetch_file(&pool, file_id).await?;
    assert_eq!(file.status, FileStatus::Completed);

    let (completed, failed, _) = mpe_db::files::instruction_outcome_counts(&pool, file_id).await?;
    assert_eq!(completed, 5);
    assert_eq!(failed, 0);

    let acct = mpe_db::accounts::fetch_account(&pool, account_id).await?;
    assert_eq!(acct.balance_micros, units(700).micros());
    assert_eq!(acct.reserved_micros, 0);

    // The audit chain holds end to end.
    assert!(matches!(
        mpe_audit::verify_hash_chain(tmp.path().join("audit.jsonl"))?,
        mpe_audit::VerifyResult::Valid { .. }
    ));

    Ok(())
}
