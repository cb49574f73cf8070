//! The async worker: claims outbox jobs and drives validation and
//! execution flows end to end.
//!
//! One `Worker` serves one process; multiple processes (or tasks) may run
//! against the same database — the skip-locked outbox claim keeps their
//! batches disjoint, and every file-status write re-checks the state it
//! expects to leave, so a stale worker loses cleanly.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use mpe_audit::{topics, DecisionLog};
use mpe_db::files;
use mpe_db::instructions::NewInstruction;
use mpe_db::outbox::{self, JobKind};
use mpe_execution::{
    ChunkCommitter, CommitError, ExecInstruction, ExecutionClaim, ExecutionOrchestrator,
    ExecutionSummary, InstructionOutcome, OutcomeKind, RailExecutor, ThreadPause,
};
use mpe_ledger::{Amount, CurrencyCode};
use mpe_lifecycle::{
    begin_processing, begin_validation, complete_processing, complete_validation, EventKind,
    FileStatus, TransitionError,
};
use mpe_schemas::{FileCompleted, FileFailed, InstructionFailed, RawRow};
use mpe_validation::{validate_rows, RowError};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::state::EngineState;

pub struct Worker {
    pool: PgPool,
    state: EngineState,
    rail: Arc<dyn RailExecutor + Send + Sync>,
    worker_id: String,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        state: EngineState,
        rail: Arc<dyn RailExecutor + Send + Sync>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            state,
            rail,
            worker_id: worker_id.into(),
        }
    }

    /// Claim and process one batch of jobs. Returns how many were handled.
    ///
    /// A job that fails stays claimed; stale-claim recovery returns it to
    /// the queue after the TTL rather than hot-looping on a poisoned job.
    pub async fn run_once(&self, audit: &mut DecisionLog, batch_size: i64) -> Result<usize> {
        let jobs = mpe_db::outbox_claim_batch(&self.pool, &self.worker_id, batch_size).await?;
        let mut handled = 0usize;

        for job in jobs {
            let result = match job.kind {
                JobKind::ValidateFile => self.handle_validate(job.file_id).await,
                JobKind::ExecuteFile => self.handle_execute(audit, job.outbox_id, job.file_id).await,
            };
            match result {
                Ok(()) => {
                    outbox::outbox_mark_done(&self.pool, job.outbox_id).await?;
                    handled += 1;
                }
                Err(e) => {
                    error!(outbox_id = job.outbox_id, file_id = %job.file_id, "job failed: {e:#}");
                }
            }
        }
        Ok(handled)
    }

    /// Poll loop: claim/handle batches, with periodic stuck-file and
    /// stale-claim sweeps. Runs until the task is cancelled.
    pub async fn run_loop(
        &self,
        audit: &mut DecisionLog,
        poll_interval: std::time::Duration,
        batch_size: i64,
    ) -> Result<()> {
        let mut ticks: u64 = 0;
        loop {
            let handled = self.run_once(audit, batch_size).await?;
            ticks += 1;

            // Sweeps roughly once a minute at the default poll interval.
            if ticks % 60 == 0 {
                crate::stale::scan_stuck_files(&self.pool).await?;
                crate::stale::recover_stale_claims(&self.pool, 300).await?;
            }

            if handled == 0 {
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Validation flow
    // -----------------------------------------------------------------------

    async fn handle_validate(&self, file_id: Uuid) -> Result<()> {
        let file = files::fetch_file(&self.pool, file_id).await?;

        // Pure guard first, then the guarded write; a stale write means a
        // concurrent worker took the job and this one stands down.
        let transition = match begin_validation(file.status) {
            Ok(t) => t,
            Err(e) => {
                warn!(%file_id, "validate job skipped: {e}");
                return Ok(());
            }
        };
        if let Err(e) =
            files::update_file_status(&self.pool, file_id, file.status, transition.next).await
        {
            if mpe_db::is_stale_transition(&e) {
                warn!(%file_id, "validate job lost the race, standing down");
                return Ok(());
            }
            return Err(e);
        }

        let raw = mpe_db::intake::fetch_intake_rows(&self.pool, file_id).await?;
        let rows: Vec<RawRow> = raw
            .into_iter()
            .map(|(row_number, fields)| raw_row_from_json(row_number, fields))
            .collect();

        let currency = CurrencyCode::new(&file.currency).map_err(|e| anyhow!("{e}"))?;
        let declared = Amount::from_micros(file.total_micros)
            .ok_or_else(|| anyhow!("file {file_id} has negative total"))?;

        match validate_rows(&rows, &currency, &self.state.rule_table, &self.state.validation_policy)
        {
            Err(batch) => {
                warn!(%file_id, "batch rejected: {batch}");
                files::apply_validation_failure(
                    &self.pool,
                    file_id,
                    rows.len() as i32,
                    0,
                    &[(0, "file".to_string(), "batch_rejected".to_string(), batch.to_string())],
                )
                .await?;
            }
            Ok(report) if report.all_passed() => {
                match complete_validation(
                    FileStatus::Validating,
                    true,
                    declared,
                    report.computed_total,
                ) {
                    Ok(_) => {
                        match candidates_to_instructions(&report.candidates) {
                            Ok(instructions) => {
                                files::apply_validation_success(&self.pool, file_id, &instructions)
                                    .await?;
                                info!(%file_id, rows = report.valid_rows, "file awaiting approval");
                            }
                            Err(ref_errors) => {
                                files::apply_validation_failure(
                                    &self.pool,
                                    file_id,
                                    report.total_rows as i32,
                                    (report.total_rows - ref_errors.len()) as i32,
                                    &row_errors_for_db(&ref_errors),
                                )
                                .await?;
                            }
                        }
                    }
                    Err(e @ TransitionError::ConsistencyViolation { .. }) => {
                        // Declared total and instruction sum disagree:
                        // rejected, recorded, never corrected.
                        warn!(%file_id, "consistency violation: {e}");
                        files::apply_validation_failure(
                            &self.pool,
                            file_id,
                            report.total_rows as i32,
                            report.valid_rows as i32,
                            &[(
                                0,
                                "total_amount".to_string(),
                                "consistency_violation".to_string(),
                                e.to_string(),
                            )],
                        )
                        .await?;
                    }
                    Err(e) => return Err(anyhow!("{e}")),
                }
            }
            Ok(report) => {
                info!(%file_id, errors = report.row_errors.len(), "validation failed");
                files::apply_validation_failure(
                    &self.pool,
                    file_id,
                    report.total_rows as i32,
                    report.valid_rows as i32,
                    &row_errors_for_db(&report.row_errors),
                )
                .await?;
            }
        }

        mpe_db::intake::delete_intake_rows(&self.pool, file_id).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Execution flow
    // -----------------------------------------------------------------------

    async fn handle_execute(
        &self,
        audit: &mut DecisionLog,
        outbox_id: i64,
        file_id: Uuid,
    ) -> Result<()> {
        let file = files::fetch_file(&self.pool, file_id).await?;

        match file.status {
            FileStatus::Approved => {
                let transition = begin_processing(file.status).map_err(|e| anyhow!("{e}"))?;
                files::update_file_status(&self.pool, file_id, FileStatus::Approved, transition.next)
                    .await?;
                files::set_processing_deadline(
                    &self.pool,
                    file_id,
                    self.state.processing_timeout_secs as i64,
                )
                .await?;
            }
            // Crash-resume: a prior run died mid-file. Committed chunks are
            // terminal; only pending rows remain to execute.
            FileStatus::Processing => {
                info!(%file_id, "resuming interrupted execution");
            }
            other => {
                warn!(%file_id, status = other.as_str(), "execute job skipped");
                return Ok(());
            }
        }

        let pending = mpe_db::instructions::fetch_pending_instructions(&self.pool, file_id).await?;
        let instructions: Vec<ExecInstruction> = pending
            .iter()
            .map(|p| {
                Ok(ExecInstruction {
                    instruction_id: p.instruction_id,
                    row_ordinal: p.row_ordinal as u32,
                    beneficiary_ref: p.beneficiary_id.to_string(),
                    amount: p.amount,
                    currency: CurrencyCode::new(&p.currency).map_err(|e| anyhow!("{e}"))?,
                    purpose_code: p.purpose_code.clone(),
                })
            })
            .collect::<Result<_>>()?;

        let summary = if instructions.is_empty() {
            ExecutionSummary::default()
        } else {
            let claim = ExecutionClaim::from_claimed_job(outbox_id, file_id);
            let rail = Arc::clone(&self.rail);
            let committer = DbChunkCommitter {
                handle: tokio::runtime::Handle::current(),
                pool: self.pool.clone(),
                account_id: file.funding_account_id,
            };
            let chunk_size = self.state.chunk_size;
            let retry = self.state.retry;

            tokio::task::spawn_blocking(move || {
                let mut orch = ExecutionOrchestrator::new(
                    ArcRail(rail),
                    committer,
                    ThreadPause,
                    chunk_size,
                    retry,
                );
                orch.run(&claim, &instructions)
            })
            .await
            .context("execution task panicked")?
            .map_err(|e| anyhow!("{e}"))?
        };

        // Terminal decision uses database tallies so resumed runs count the
        // chunks a dead worker already committed.
        let (completed, failed, _cancelled) =
            files::instruction_outcome_counts(&self.pool, file_id).await?;
        let transition =
            complete_processing(FileStatus::Processing, completed as u32, failed as u32)
                .map_err(|e| anyhow!("{e}"))?;
        files::update_file_status(&self.pool, file_id, FileStatus::Processing, transition.next)
            .await?;

        for effect in &transition.effects {
            if let mpe_lifecycle::Effect::EmitEvent(kind) = effect {
                self.emit_terminal_event(audit, &file, *kind, completed, failed, &summary)?;
            }
        }
        for failure in &summary.failures {
            let payload = InstructionFailed {
                instruction_id: failure.instruction_id,
                file_id,
                row_ordinal: failure.row_ordinal,
                reason: failure.reason.clone(),
            };
            audit
                .append(
                    file.client_id,
                    topics::INSTRUCTIONS,
                    "instruction.failed",
                    serde_json::to_value(&payload).context("serialize instruction.failed")?,
                )
                .context("audit instruction.failed")?;
        }

        info!(%file_id, completed, failed, terminal = transition.next.as_str(), "execution finished");
        Ok(())
    }

    fn emit_terminal_event(
        &self,
        audit: &mut DecisionLog,
        file: &files::FileRow,
        kind: EventKind,
        completed: i64,
        failed: i64,
        summary: &ExecutionSummary,
    ) -> Result<()> {
        let payload = match kind {
            EventKind::FileCompleted => serde_json::to_value(FileCompleted {
                file_id: file.file_id,
                client_id: file.client_id,
                succeeded: completed as u32,
                failed: failed as u32,
                settled_total: summary.settled_total.to_string(),
                released_total: summary.released_total.to_string(),
            })
            .context("serialize file.completed")?,
            EventKind::FileFailed => serde_json::to_value(FileFailed {
                file_id: file.file_id,
                client_id: file.client_id,
                failed: failed as u32,
            })
            .context("serialize file.failed")?,
            EventKind::FileApproved => return Ok(()),
        };
        audit
            .append(file.client_id, topics::FILES, kind.as_str(), payload)
            .context("audit terminal event")?;
        Ok(())
    }
}

/// Newtype so an `Arc<dyn RailExecutor>` satisfies the orchestrator's
/// generic rail parameter.
struct ArcRail(Arc<dyn RailExecutor + Send + Sync>);

impl RailExecutor for ArcRail {
    fn execute(
        &self,
        instruction: &ExecInstruction,
    ) -> Result<mpe_execution::RailReceipt, mpe_execution::RailError> {
        self.0.execute(instruction)
    }
}

/// Applies one chunk's terminal statuses and ledger effects in a single
/// database transaction. Runs on the blocking execution thread and hops
/// back onto the runtime for the async work.
struct DbChunkCommitter {
    handle: tokio::runtime::Handle,
    pool: PgPool,
    account_id: Uuid,
}

impl ChunkCommitter for DbChunkCommitter {
    fn commit_chunk(
        &mut self,
        _claim: &ExecutionClaim,
        outcomes: &[InstructionOutcome],
    ) -> Result<(), CommitError> {
        let pool = self.pool.clone();
        let account_id = self.account_id;
        let outcomes = outcomes.to_vec();

        self.handle
            .block_on(async move {
                let mut tx = pool.begin().await.context("begin chunk tx")?;
                for o in &outcomes {
                    match &o.kind {
                        OutcomeKind::Settled { external_ref } => {
                            mpe_db::instructions::mark_instruction_terminal(
                                &mut tx,
                                o.instruction_id,
                                true,
                                Some(external_ref),
                                None,
                            )
                            .await?;
                            mpe_db::account_settle(&mut *tx, account_id, o.amount).await?;
                        }
                        OutcomeKind::Released { reason } => {
                            mpe_db::instructions::mark_instruction_terminal(
                                &mut tx,
                                o.instruction_id,
                                false,
                                None,
                                Some(reason),
                            )
                            .await?;
                            mpe_db::account_release(&mut *tx, account_id, o.amount).await?;
                        }
                    }
                }
                tx.commit().await.context("commit chunk tx")?;
                Ok::<(), anyhow::Error>(())
            })
            .map_err(|e| CommitError(format!("{e:#}")))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn raw_row_from_json(row_number: i32, fields: serde_json::Value) -> RawRow {
    let mut map = BTreeMap::new();
    if let Some(obj) = fields.as_object() {
        for (k, v) in obj {
            let s = match v.as_str() {
                Some(s) => s.to_string(),
                None => v.to_string(),
            };
            map.insert(k.clone(), s);
        }
    }
    RawRow {
        row_number: row_number as u32,
        fields: map,
    }
}

/// Map candidates to instruction rows, requiring beneficiary refs to be
/// UUIDs. Bad refs come back as row errors instead of instructions.
fn candidates_to_instructions(
    candidates: &[mpe_validation::InstructionCandidate],
) -> std::result::Result<Vec<NewInstruction>, Vec<RowError>> {
    let mut out = Vec::with_capacity(candidates.len());
    let mut errors = Vec::new();

    for c in candidates {
        match c.beneficiary_ref.parse::<Uuid>() {
            Ok(beneficiary_id) => out.push(NewInstruction {
                instruction_id: Uuid::new_v4(),
                row_ordinal: c.row_ordinal as i32,
                beneficiary_id,
                amount_micros: c.amount.micros(),
                currency: c.currency.to_string(),
                purpose_code: c.purpose_code.clone(),
                invoice_number: c.invoice_number.clone(),
            }),
            Err(_) => errors.push(RowError::new(
                c.row_ordinal,
                "beneficiary_id",
                mpe_validation::ErrorCode::MissingField,
                "beneficiary_id is not a valid reference",
            )),
        }
    }

    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

fn row_errors_for_db(errors: &[RowError]) -> Vec<(i32, String, String, String)> {
    errors
        .iter()
        .map(|e| {
            (
                e.row_number as i32,
                e.field.clone(),
                e.code.as_str().to_string(),
                e.message.clone(),
            )
        })
        .collect()
}
