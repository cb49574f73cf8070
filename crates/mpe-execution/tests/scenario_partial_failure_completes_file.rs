use mpe_execution::{
    ChunkCommitter, CommitError, ExecInstruction, ExecutionClaim, ExecutionOrchestrator,
    InstructionOutcome, NoPause, OutcomeKind, RailError, RailExecutor, RailReceipt, RetryPolicy,
};
use mpe_ledger::{Amount, CurrencyCode, FundingAccount};
use mpe_lifecycle::FileStatus;
use uuid::Uuid;

fn units(n: i64) -> Amount {
    Amount::from_units(n).unwrap()
}

/// Fails every 10th row fatally.
struct EveryTenthFails;

impl RailExecutor for EveryTenthFails {
    fn execute(&self, ins: &ExecInstruction) -> Result<RailReceipt, RailError> {
        if ins.row_ordinal % 10 == 0 {
            Err(RailError::Fatal("account closed".to_string()))
        } else {
            Ok(RailReceipt {
                external_ref: format!("ext-{}", ins.row_ordinal),
            })
        }
    }
}

/// Applies settle/release against a real funding account and counts calls.
struct LedgerCommitter {
    account: FundingAccount,
    settles: u32,
    releases: u32,
}

impl ChunkCommitter for LedgerCommitter {
    fn commit_chunk(
        &mut self,
        _claim: &ExecutionClaim,
        outcomes: &[InstructionOutcome],
    ) -> Result<(), CommitError> {
        for o in outcomes {
            match &o.kind {
                OutcomeKind::Settled { .. } => {
                    self.account
                        .settle(o.amount)
                        .map_err(|e| CommitError(e.to_string()))?;
                    self.settles += 1;
                }
                OutcomeKind::Released { .. } => {
                    self.account
                        .release(o.amount)
                        .map_err(|e| CommitError(e.to_string()))?;
                    self.releases += 1;
                }
            }
        }
        Ok(())
    }
}

/// 100 instructions of 10.00 each, rows 10,20,…,100 failing: the file must
/// reach `completed` (not `failed`) with exactly 90 settled and 10 released,
/// and the reservation fully unwound.
#[test]
fn scenario_ninety_ten_split_completes_file_and_unwinds_reservation() {
    let file_total = units(1_000);
    let mut account = FundingAccount::new(units(5_000));
    account.reserve(file_total).unwrap();

    let instructions: Vec<ExecInstruction> = (1..=100)
        .map(|i| ExecInstruction {
            instruction_id: Uuid::from_u128(i as u128),
            row_ordinal: i,
            beneficiary_ref: format!("ben-{i}"),
            amount: units(10),
            currency: CurrencyCode::new("USD").unwrap(),
            purpose_code: None,
        })
        .collect();

    let committer = LedgerCommitter {
        account,
        settles: 0,
        releases: 0,
    };
    let mut orch = ExecutionOrchestrator::new(
        EveryTenthFails,
        committer,
        NoPause,
        25,
        RetryPolicy::default(),
    );

    let claim = ExecutionClaim::for_test(Uuid::from_u128(7));
    let summary = orch.run(&claim, &instructions).unwrap();

    assert_eq!(summary.succeeded, 90);
    assert_eq!(summary.failed, 10);
    assert_eq!(summary.settled_total, units(900));
    assert_eq!(summary.released_total, units(100));
    assert_eq!(summary.failures.len(), 10);

    // Partial failure completes the file; only a full wipeout fails it.
    assert_eq!(summary.file_transition().unwrap().next, FileStatus::Completed);
}

/// Counting is observable at the committer: settle exactly 90 times and
/// release exactly 10, leaving balance 4000.00 and nothing reserved.
#[test]
fn scenario_settle_and_release_call_counts_are_exact() {
    let mut account = FundingAccount::new(units(5_000));
    account.reserve(units(1_000)).unwrap();

    let instructions: Vec<ExecInstruction> = (1..=100)
        .map(|i| ExecInstruction {
            instruction_id: Uuid::from_u128(i as u128),
            row_ordinal: i,
            beneficiary_ref: format!("ben-{i}"),
            amount: units(10),
            currency: CurrencyCode::new("USD").unwrap(),
            purpose_code: None,
        })
        .collect();

    let mut committer = LedgerCommitter {
        account,
        settles: 0,
        releases: 0,
    };
    {
        let mut orch = ExecutionOrchestrator::new(
            EveryTenthFails,
            &mut committer,
            NoPause,
            100,
            RetryPolicy::default(),
        );
        let claim = ExecutionClaim::for_test(Uuid::from_u128(7));
        orch.run(&claim, &instructions).unwrap();
    }

    assert_eq!(committer.settles, 90);
    assert_eq!(committer.releases, 10);

    let snap = committer.account.snapshot();
    assert_eq!(snap.balance, units(4_100));
    assert_eq!(snap.reserved, Amount::ZERO);
    assert_eq!(snap.available, units(4_100));
}
