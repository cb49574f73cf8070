//! Execution orchestrator — the single choke-point for settling a file.
//!
//! # Invariants
//!
//! - [`ExecutionOrchestrator::run`] requires an [`ExecutionClaim`]; the
//!   token can only come from a claimed outbox job (or a test constructor
//!   gated behind the `testkit` feature), so at most one execution per file
//!   is active.
//! - Instructions are processed in fixed-size chunks; each chunk's terminal
//!   statuses and ledger effects (settle on success, release on failure) are
//!   handed to the [`ChunkCommitter`] as one unit — the committer applies
//!   them in a single transaction. Chunk boundaries bound transaction size
//!   for 10,000-row files.
//! - Transient rail errors retry with exponential backoff, then fail the
//!   instruction; fatal errors fail immediately. A failed instruction never
//!   rolls back its siblings, and retries never re-reserve funds.
//! - No lock is held across the rail call: reservation happened at approval
//!   time, and the committer only runs between calls.

use mpe_ledger::Amount;
use mpe_lifecycle::{complete_processing, instruction, FileStatus, InstructionStatus, Transition, TransitionError};
use uuid::Uuid;

use crate::claim::ExecutionClaim;
use crate::rail::{ExecInstruction, RailError, RailExecutor};
use crate::retry::{Pause, RetryPolicy};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How one instruction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Rail confirmed; the instruction's amount must be settled.
    Settled { external_ref: String },
    /// Rail failed terminally; the instruction's amount must be released.
    Released { reason: String },
}

/// Terminal verdict for one instruction, ready for atomic commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionOutcome {
    pub instruction_id: Uuid,
    pub row_ordinal: u32,
    pub amount: Amount,
    pub status: InstructionStatus,
    pub kind: OutcomeKind,
}

/// Commit seam: applies a chunk's terminal statuses and ledger effects in
/// one transaction. The in-memory implementation lives in mpe-testkit; the
/// persisted one in mpe-runtime.
pub trait ChunkCommitter {
    fn commit_chunk(
        &mut self,
        claim: &ExecutionClaim,
        outcomes: &[InstructionOutcome],
    ) -> Result<(), CommitError>;
}

impl<T: ChunkCommitter + ?Sized> ChunkCommitter for &mut T {
    fn commit_chunk(
        &mut self,
        claim: &ExecutionClaim,
        outcomes: &[InstructionOutcome],
    ) -> Result<(), CommitError> {
        (**self).commit_chunk(claim, outcomes)
    }
}

/// A chunk commit failure. Aborts the run; the file stays `processing` and
/// is surfaced by the stuck-file scan rather than silently retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitError(pub String);

impl std::fmt::Display for CommitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chunk commit failed: {}", self.0)
    }
}

impl std::error::Error for CommitError {}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedInstruction {
    pub instruction_id: Uuid,
    pub row_ordinal: u32,
    pub reason: String,
}

/// Aggregated result of one execution run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub succeeded: u32,
    pub failed: u32,
    pub settled_total: Amount,
    pub released_total: Amount,
    pub failures: Vec<FailedInstruction>,
}

impl ExecutionSummary {
    /// The file's terminal transition for this run: `completed` when at
    /// least one instruction settled, `failed` when every one failed.
    pub fn file_transition(&self) -> Result<Transition, TransitionError> {
        complete_processing(FileStatus::Processing, self.succeeded, self.failed)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct ExecutionOrchestrator<R, C, P>
where
    R: RailExecutor,
    C: ChunkCommitter,
    P: Pause,
{
    rail: R,
    committer: C,
    pause: P,
    chunk_size: usize,
    retry: RetryPolicy,
}

impl<R, C, P> ExecutionOrchestrator<R, C, P>
where
    R: RailExecutor,
    C: ChunkCommitter,
    P: Pause,
{
    /// `chunk_size` is clamped to at least 1.
    pub fn new(rail: R, committer: C, pause: P, chunk_size: usize, retry: RetryPolicy) -> Self {
        Self {
            rail,
            committer,
            pause,
            chunk_size: chunk_size.max(1),
            retry,
        }
    }

    /// Execute all instructions of the claimed file and aggregate outcomes.
    ///
    /// Instructions must be the file's `pending` rows in ordinal order. The
    /// returned summary feeds the file's terminal transition; a commit
    /// failure aborts mid-file with committed chunks intact.
    pub fn run(
        &mut self,
        claim: &ExecutionClaim,
        instructions: &[ExecInstruction],
    ) -> Result<ExecutionSummary, CommitError> {
        let mut summary = ExecutionSummary::default();

        for chunk in instructions.chunks(self.chunk_size) {
            let outcomes: Vec<InstructionOutcome> =
                chunk.iter().map(|ins| self.execute_one(ins)).collect();
            self.committer.commit_chunk(claim, &outcomes)?;

            for outcome in outcomes {
                match outcome.kind {
                    OutcomeKind::Settled { .. } => {
                        summary.succeeded += 1;
                        summary.settled_total = summary
                            .settled_total
                            .checked_add(outcome.amount)
                            .unwrap_or(Amount::MAX);
                    }
                    OutcomeKind::Released { reason } => {
                        summary.failed += 1;
                        summary.released_total = summary
                            .released_total
                            .checked_add(outcome.amount)
                            .unwrap_or(Amount::MAX);
                        summary.failures.push(FailedInstruction {
                            instruction_id: outcome.instruction_id,
                            row_ordinal: outcome.row_ordinal,
                            reason,
                        });
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Drive one instruction through its sub-state machine, retrying
    /// transient rail errors per policy.
    fn execute_one(&self, ins: &ExecInstruction) -> InstructionOutcome {
        let processing =
            instruction::begin(InstructionStatus::Pending).expect("pending rows begin cleanly");

        let mut attempt = 1u32;
        let kind = loop {
            match self.rail.execute(ins) {
                Ok(receipt) => {
                    break OutcomeKind::Settled {
                        external_ref: receipt.external_ref,
                    }
                }
                Err(RailError::Fatal(reason)) => break OutcomeKind::Released { reason },
                Err(RailError::Transient(reason)) => {
                    if attempt >= self.retry.max_attempts {
                        break OutcomeKind::Released { reason };
                    }
                    self.pause.pause(self.retry.delay_after(attempt));
                    attempt += 1;
                }
            }
        };

        let status = match &kind {
            OutcomeKind::Settled { .. } => {
                instruction::complete(processing).expect("processing rows complete")
            }
            OutcomeKind::Released { .. } => {
                instruction::fail(processing).expect("processing rows fail")
            }
        };

        InstructionOutcome {
            instruction_id: ins.instruction_id,
            row_ordinal: ins.row_ordinal,
            amount: ins.amount,
            status,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::NoPause;
    use mpe_ledger::CurrencyCode;
    use std::cell::RefCell;
    use std::collections::HashMap;

    fn units(n: i64) -> Amount {
        Amount::from_units(n).unwrap()
    }

    fn instructions(n: u32) -> Vec<ExecInstruction> {
        (1..=n)
            .map(|i| ExecInstruction {
                instruction_id: Uuid::from_u128(i as u128),
                row_ordinal: i,
                beneficiary_ref: format!("ben-{i}"),
                amount: units(10),
                currency: CurrencyCode::new("USD").unwrap(),
                purpose_code: None,
            })
            .collect()
    }

    /// Rail scripted by row ordinal: listed ordinals fail fatally.
    struct FailOrdinals(Vec<u32>);

    impl RailExecutor for FailOrdinals {
        fn execute(&self, ins: &ExecInstruction) -> Result<crate::rail::RailReceipt, RailError> {
            if self.0.contains(&ins.row_ordinal) {
                Err(RailError::Fatal("beneficiary account closed".to_string()))
            } else {
                Ok(crate::rail::RailReceipt {
                    external_ref: format!("ext-{}", ins.row_ordinal),
                })
            }
        }
    }

    /// Rail that fails transiently `fail_times` before succeeding, per row.
    struct FlakyRail {
        fail_times: u32,
        attempts: RefCell<HashMap<u32, u32>>,
    }

    impl RailExecutor for FlakyRail {
        fn execute(&self, ins: &ExecInstruction) -> Result<crate::rail::RailReceipt, RailError> {
            let mut attempts = self.attempts.borrow_mut();
            let n = attempts.entry(ins.row_ordinal).or_insert(0);
            *n += 1;
            if *n <= self.fail_times {
                Err(RailError::Transient("rail timeout".to_string()))
            } else {
                Ok(crate::rail::RailReceipt {
                    external_ref: format!("ext-{}", ins.row_ordinal),
                })
            }
        }
    }

    /// Records chunk sizes; never fails.
    #[derive(Default)]
    struct RecordingCommitter {
        chunks: Vec<usize>,
        outcomes: Vec<InstructionOutcome>,
    }

    impl ChunkCommitter for RecordingCommitter {
        fn commit_chunk(
            &mut self,
            _claim: &ExecutionClaim,
            outcomes: &[InstructionOutcome],
        ) -> Result<(), CommitError> {
            self.chunks.push(outcomes.len());
            self.outcomes.extend_from_slice(outcomes);
            Ok(())
        }
    }

    fn claim() -> ExecutionClaim {
        ExecutionClaim::for_test(Uuid::from_u128(500))
    }

    #[test]
    fn all_success_summary() {
        let mut orch = ExecutionOrchestrator::new(
            FailOrdinals(vec![]),
            RecordingCommitter::default(),
            NoPause,
            100,
            RetryPolicy::default(),
        );
        let summary = orch.run(&claim(), &instructions(5)).unwrap();
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.settled_total, units(50));
        assert_eq!(summary.released_total, Amount::ZERO);
        assert_eq!(summary.file_transition().unwrap().next, FileStatus::Completed);
    }

    #[test]
    fn fatal_failures_release_and_keep_siblings() {
        let mut orch = ExecutionOrchestrator::new(
            FailOrdinals(vec![2, 4]),
            RecordingCommitter::default(),
            NoPause,
            100,
            RetryPolicy::default(),
        );
        let summary = orch.run(&claim(), &instructions(5)).unwrap();
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.released_total, units(20));
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.failures[0].row_ordinal, 2);
        assert_eq!(summary.failures[0].reason, "beneficiary account closed");
        // Partial failure still completes the file.
        assert_eq!(summary.file_transition().unwrap().next, FileStatus::Completed);
    }

    #[test]
    fn all_failed_file_fails() {
        let mut orch = ExecutionOrchestrator::new(
            FailOrdinals(vec![1, 2, 3]),
            RecordingCommitter::default(),
            NoPause,
            100,
            RetryPolicy::default(),
        );
        let summary = orch.run(&claim(), &instructions(3)).unwrap();
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.file_transition().unwrap().next, FileStatus::Failed);
    }

    #[test]
    fn chunking_respects_size() {
        let mut orch = ExecutionOrchestrator::new(
            FailOrdinals(vec![]),
            RecordingCommitter::default(),
            NoPause,
            2,
            RetryPolicy::default(),
        );
        orch.run(&claim(), &instructions(5)).unwrap();
        assert_eq!(orch.committer.chunks, vec![2, 2, 1]);
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let mut orch = ExecutionOrchestrator::new(
            FailOrdinals(vec![]),
            RecordingCommitter::default(),
            NoPause,
            0,
            RetryPolicy::default(),
        );
        orch.run(&claim(), &instructions(2)).unwrap();
        assert_eq!(orch.committer.chunks, vec![1, 1]);
    }

    #[test]
    fn transient_errors_retry_then_succeed() {
        let rail = FlakyRail {
            fail_times: 2,
            attempts: RefCell::new(HashMap::new()),
        };
        let mut orch = ExecutionOrchestrator::new(
            rail,
            RecordingCommitter::default(),
            NoPause,
            100,
            RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
        );
        let summary = orch.run(&claim(), &instructions(1)).unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(*orch.rail.attempts.borrow().get(&1).unwrap(), 3);
    }

    #[test]
    fn transient_errors_exhaust_attempts_then_fail() {
        let rail = FlakyRail {
            fail_times: 99,
            attempts: RefCell::new(HashMap::new()),
        };
        let mut orch = ExecutionOrchestrator::new(
            rail,
            RecordingCommitter::default(),
            NoPause,
            100,
            RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
        );
        let summary = orch.run(&claim(), &instructions(1)).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].reason, "rail timeout");
        assert_eq!(*orch.rail.attempts.borrow().get(&1).unwrap(), 3);
    }

    #[test]
    fn commit_failure_aborts_run() {
        struct FailingCommitter;
        impl ChunkCommitter for FailingCommitter {
            fn commit_chunk(
                &mut self,
                _claim: &ExecutionClaim,
                _outcomes: &[InstructionOutcome],
            ) -> Result<(), CommitError> {
                Err(CommitError("db unavailable".to_string()))
            }
        }
        let mut orch = ExecutionOrchestrator::new(
            FailOrdinals(vec![]),
            FailingCommitter,
            NoPause,
            100,
            RetryPolicy::default(),
        );
        assert!(orch.run(&claim(), &instructions(1)).is_err());
    }

    #[test]
    fn outcomes_carry_terminal_statuses() {
        let mut orch = ExecutionOrchestrator::new(
            FailOrdinals(vec![2]),
            RecordingCommitter::default(),
            NoPause,
            100,
            RetryPolicy::default(),
        );
        orch.run(&claim(), &instructions(2)).unwrap();
        let statuses: Vec<_> = orch.committer.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![InstructionStatus::Completed, InstructionStatus::Failed]
        );
    }
}
