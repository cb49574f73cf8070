use chrono::Utc;
use mpe_ledger::Amount;
use mpe_lifecycle::FileStatus;
use uuid::Uuid;

/// The completing-approval transaction moves funds, writes the status, and
/// enqueues the execution job atomically; an insufficient account rolls the
/// whole thing back and the file stays `awaiting_approval`.
///
/// DB-backed test. Skips if MPE_DATABASE_URL is not set.
#[tokio::test]
async fn approval_tx_reserves_and_enqueues_atomically() -> anyhow::Result<()> {
    let url = match std::env::var(mpe_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: MPE_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;
    mpe_db::migrate(&pool).await?;

    let units = |n: i64| Amount::from_units(n).unwrap();
    let client_id = Uuid::new_v4();
    let creator = Uuid::new_v4();
    let approver = Uuid::new_v4();

    // --- Underfunded account: the approval must roll back entirely. ---
    let poor_account = Uuid::new_v4();
    mpe_db::accounts::insert_account(&pool, poor_account, client_id, "USD", units(100)).await?;

    let poor_file = Uuid::new_v4();
    mpe_db::files::insert_file(
        &pool,
        &mpe_db::NewFile {
            file_id: poor_file,
            client_id,
            funding_account_id: poor_account,
            currency: "USD".to_string(),
            total_micros: units(1_000).micros(),
            created_by: creator,
        },
    )
    .await?;
    mpe_db::files::update_file_status(&pool, poor_file, FileStatus::Draft, FileStatus::Validating)
        .await?;
    mpe_db::files::update_file_status(
        &pool,
        poor_file,
        FileStatus::Validating,
        FileStatus::AwaitingApproval,
    )
    .await?;

    let decision = mpe_db::files::NewApproval {
        approval_id: Uuid::new_v4(),
        file_id: poor_file,
        decided_by: approver,
        decided_at_utc: Utc::now(),
        outcome: "approved".to_string(),
        tier_limit_micros: Some(units(2_000).micros()),
        denial_code: None,
    };
    let err =
        mpe_db::files::approve_file_tx(&pool, poor_file, FileStatus::AwaitingApproval, &decision)
            .await
            .unwrap_err();
    assert!(mpe_db::is_insufficient_funds(&err), "got: {err}");

    // File unchanged, nothing reserved, no job enqueued.
    let file = mpe_db::files::fetch_file(&pool, poor_file).await?;
    assert_eq!(file.status, FileStatus::AwaitingApproval);
    assert!(file.approved_by.is_none());
    let acct = mpe_db::accounts::fetch_account(&pool, poor_account).await?;
    assert_eq!(acct.reserved_micros, 0);

    // --- Funded account: everything commits together. ---
    let account = Uuid::new_v4();
    mpe_db::accounts::insert_account(&pool, account, client_id, "USD", units(5_000)).await?;

    let file_id = Uuid::new_v4();
    mpe_db::files::insert_file(
        &pool,
        &mpe_db::NewFile {
            file_id,
            client_id,
            funding_account_id: account,
            currency: "USD".to_string(),
            total_micros: units(1_000).micros(),
            created_by: creator,
        },
    )
    .await?;
    mpe_db::files::update_file_status(&pool, file_id, FileStatus::Draft, FileStatus::Validating)
        .await?;
    mpe_db::files::update_file_status(
        &pool,
        file_id,
        FileStatus::Validating,
        FileStatus::AwaitingApproval,
    )
    .await?;

    let decision = mpe_db::files::NewApproval {
        approval_id: Uuid::new_v4(),
        file_id,
        decided_by: approver,
        decided_at_utc: Utc::now(),
        outcome: "approved".to_string(),
        tier_limit_micros: Some(units(2_000).micros()),
        denial_code: None,
    };
    mpe_db::files::approve_file_tx(&pool, file_id, FileStatus::AwaitingApproval, &decision)
        .await?;

    let file = mpe_db::files::fetch_file(&pool, file_id).await?;
    assert_eq!(file.status, FileStatus::Approved);
    assert_eq!(file.approved_by, Some(approver));

    let acct = mpe_db::accounts::fetch_account(&pool, account).await?;
    assert_eq!(acct.reserved_micros, units(1_000).micros());

    // A second approval attempt finds the file moved on.
    let err = mpe_db::files::approve_file_tx(&pool, file_id, FileStatus::AwaitingApproval, &decision)
        .await
        .unwrap_err();
    assert!(mpe_db::is_stale_transition(&err), "got: {err}");
    let acct = mpe_db::accounts::fetch_account(&pool, account).await?;
    assert_eq!(acct.reserved_micros, units(1_000).micros(), "no double reserve");

    Ok(())
}
