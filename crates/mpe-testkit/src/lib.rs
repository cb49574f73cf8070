//! Test fixtures for the mass payments engine.
//!
//! Builders for files, rows, approvers, and limit tables; a scripted rail
//! and an in-memory chunk committer so end-to-end scenarios run without a
//! database.

use std::collections::HashMap;

use mpe_approval::{Approver, FileView, LimitTable};
use mpe_execution::{
    ChunkCommitter, CommitError, ExecInstruction, ExecutionClaim, InstructionOutcome, OutcomeKind,
    RailError, RailExecutor, RailReceipt,
};
use mpe_ledger::{Amount, CurrencyCode, FundingAccount};
use mpe_lifecycle::FileStatus;
use mpe_schemas::RawRow;
use mpe_validation::InstructionCandidate;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Row / file fixtures
// ---------------------------------------------------------------------------

/// Builds a uniform batch of valid rows for one currency, with hooks to
/// break individual rows.
pub struct FileFixture {
    pub currency: CurrencyCode,
    pub client_id: Uuid,
    pub created_by: Uuid,
    rows: Vec<RawRow>,
}

impl FileFixture {
    /// `count` rows of `amount_each`, each carrying the settlement fields
    /// the builtin rule table requires for `currency`.
    pub fn uniform(currency: &str, count: u32, amount_each: &str) -> Self {
        let currency = CurrencyCode::new(currency).expect("fixture currency");
        let rows = (1..=count)
            .map(|i| {
                let mut row = RawRow::new(i)
                    .with_field("beneficiary_id", &Uuid::from_u128(1000 + i as u128).to_string())
                    .with_field("amount", amount_each);
                row = match currency.as_str() {
                    "EUR" => row.with_field("iban", "DE89370400440532013000"),
                    "GBP" => row
                        .with_field("sort_code", "12-34-56")
                        .with_field("account_number", "12345678"),
                    "INR" => row
                        .with_field("swift_code", "HDFCINBB")
                        .with_field("account_number", "12345678")
                        .with_field("invoice_number", &format!("INV-{i}"))
                        .with_field("purpose_code", "S0101"),
                    _ => row
                        .with_field("swift_code", "CHASUS33")
                        .with_field("account_number", "12345678"),
                };
                row
            })
            .collect();

        Self {
            currency,
            client_id: Uuid::from_u128(1),
            created_by: Uuid::from_u128(2),
            rows,
        }
    }

    /// Remove a field from one row (1-based row number).
    pub fn break_row(mut self, row_number: u32, field: &str) -> Self {
        if let Some(row) = self.rows.iter_mut().find(|r| r.row_number == row_number) {
            row.fields.remove(field);
        }
        self
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    /// Declared total = sum of the rows' amount fields.
    pub fn declared_total(&self) -> Amount {
        Amount::checked_sum(
            self.rows
                .iter()
                .filter_map(|r| r.field("amount"))
                .filter_map(|a| Amount::parse(a).ok()),
        )
        .expect("fixture total")
    }

    /// A FileView for the approval gate at the given status.
    pub fn view(&self, status: FileStatus, total: Amount) -> FileView {
        FileView {
            file_id: Uuid::from_u128(99),
            client_id: self.client_id,
            created_by: self.created_by,
            currency: self.currency.clone(),
            total_amount: total,
            status,
            has_validation_errors: false,
        }
    }
}

/// Parse intake rows from CSV text with a header line, the way the upstream
/// extractor hands them over.
pub fn rows_from_csv(text: &str) -> anyhow::Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let mut row = RawRow::new(i as u32 + 1);
        for (header, value) in headers.iter().zip(record.iter()) {
            row.fields
                .insert(header.to_ascii_lowercase(), value.to_string());
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Candidates → rail instructions (in-memory path, no persistence ids).
pub fn instructions_from_candidates(candidates: &[InstructionCandidate]) -> Vec<ExecInstruction> {
    candidates
        .iter()
        .map(|c| ExecInstruction {
            instruction_id: Uuid::from_u128(0x9000 + c.row_ordinal as u128),
            row_ordinal: c.row_ordinal,
            beneficiary_ref: c.beneficiary_ref.clone(),
            amount: c.amount,
            currency: c.currency.clone(),
            purpose_code: c.purpose_code.clone(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Approver / limits fixtures
// ---------------------------------------------------------------------------

pub fn approver_with_role(user_id: u128, client_id: Uuid, role: &str) -> Approver {
    Approver {
        user_id: Uuid::from_u128(user_id),
        client_id,
        roles: vec![role.to_string()],
        limit_override: None,
    }
}

pub fn limits_single(role: &str, currency: &CurrencyCode, limit: Amount) -> LimitTable {
    let mut table = LimitTable::default();
    table.insert(role, currency, limit);
    table
}

// ---------------------------------------------------------------------------
// Scripted rail
// ---------------------------------------------------------------------------

/// A rail scripted per row ordinal: unlisted ordinals settle.
#[derive(Default)]
pub struct ScriptedRail {
    outcomes: HashMap<u32, RailError>,
}

impl ScriptedRail {
    pub fn settling() -> Self {
        Self::default()
    }

    pub fn fail_fatal(mut self, row_ordinal: u32, reason: &str) -> Self {
        self.outcomes
            .insert(row_ordinal, RailError::Fatal(reason.to_string()));
        self
    }

    pub fn fail_transient(mut self, row_ordinal: u32, reason: &str) -> Self {
        self.outcomes
            .insert(row_ordinal, RailError::Transient(reason.to_string()));
        self
    }
}

impl RailExecutor for ScriptedRail {
    fn execute(&self, instruction: &ExecInstruction) -> Result<RailReceipt, RailError> {
        match self.outcomes.get(&instruction.row_ordinal) {
            Some(err) => Err(err.clone()),
            None => Ok(RailReceipt {
                external_ref: format!("scripted-{}", instruction.row_ordinal),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory chunk committer
// ---------------------------------------------------------------------------

/// Applies chunk outcomes straight onto a [`FundingAccount`], recording
/// call counts — the in-memory stand-in for the per-chunk transaction.
pub struct MemoryCommitter {
    pub account: FundingAccount,
    pub settle_calls: u32,
    pub release_calls: u32,
    pub chunk_sizes: Vec<usize>,
}

impl MemoryCommitter {
    pub fn new(account: FundingAccount) -> Self {
        Self {
            account,
            settle_calls: 0,
            release_calls: 0,
            chunk_sizes: Vec::new(),
        }
    }
}

impl ChunkCommitter for MemoryCommitter {
    fn commit_chunk(
        &mut self,
        _claim: &ExecutionClaim,
        outcomes: &[InstructionOutcome],
    ) -> Result<(), CommitError> {
        self.chunk_sizes.push(outcomes.len());
        for o in outcomes {
            match &o.kind {
                OutcomeKind::Settled { .. } => {
                    self.account
                        .settle(o.amount)
                        .map_err(|e| CommitError(e.to_string()))?;
                    self.settle_calls += 1;
                }
                OutcomeKind::Released { .. } => {
                    self.account
                        .release(o.amount)
                        .map_err(|e| CommitError(e.to_string()))?;
                    self.release_calls += 1;
                }
            }
        }
        Ok(())
    }
}
