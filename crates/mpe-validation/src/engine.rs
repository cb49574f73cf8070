//! Row validation engine.
//!
//! Pure function of (rows, file currency, rule table, policy) — no IO and no
//! side effects. A bad row never aborts the batch; the only whole-batch
//! rejections are an empty row set, a row count above the configured cap,
//! and a file currency absent from the rule table.

use mpe_ledger::{Amount, CurrencyCode};
use mpe_schemas::RawRow;
use std::collections::HashSet;

use crate::rules::CurrencyRuleTable;
use crate::types::{
    BatchRejection, ErrorCode, InstructionCandidate, RowError, ValidationReport,
};

/// Batch-level limits. The cap exists because intake promises at most
/// 10,000 instructions per file; anything larger is an upstream defect.
#[derive(Debug, Clone, Copy)]
pub struct ValidationPolicy {
    pub max_rows: usize,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self { max_rows: 10_000 }
    }
}

/// Validate an ordered batch of raw rows against the file currency.
///
/// Every row yields either an [`InstructionCandidate`] or one-or-more
/// [`RowError`]s in the report; rows with errors produce no candidate.
pub fn validate_rows(
    rows: &[RawRow],
    file_currency: &CurrencyCode,
    table: &CurrencyRuleTable,
    policy: &ValidationPolicy,
) -> Result<ValidationReport, BatchRejection> {
    if rows.is_empty() {
        return Err(BatchRejection::EmptyFile);
    }
    if rows.len() > policy.max_rows {
        return Err(BatchRejection::TooManyRows {
            count: rows.len(),
            cap: policy.max_rows,
        });
    }
    let rule = table
        .get(file_currency)
        .ok_or_else(|| BatchRejection::UnsupportedCurrency(file_currency.to_string()))?;

    let mut row_errors = Vec::new();
    let mut candidates = Vec::new();
    let mut seen_rows: HashSet<u32> = HashSet::new();

    for row in rows {
        let mut errors = Vec::new();

        if !seen_rows.insert(row.row_number) {
            errors.push(RowError::new(
                row.row_number,
                "row_number",
                ErrorCode::DuplicateRow,
                format!("row number {} appears more than once", row.row_number),
            ));
        }

        // Amount: present, decimal, strictly positive.
        let amount = match row.field("amount") {
            None => {
                errors.push(RowError::new(
                    row.row_number,
                    "amount",
                    ErrorCode::MissingField,
                    "amount is required",
                ));
                None
            }
            Some(raw) => match Amount::parse(raw) {
                Ok(a) if a.is_zero() => {
                    errors.push(RowError::new(
                        row.row_number,
                        "amount",
                        ErrorCode::InvalidAmount,
                        "amount must be greater than zero",
                    ));
                    None
                }
                Ok(a) => Some(a),
                Err(e) => {
                    errors.push(RowError::new(
                        row.row_number,
                        "amount",
                        ErrorCode::InvalidAmount,
                        e.to_string(),
                    ));
                    None
                }
            },
        };

        // Row currency, when present, must match the file currency.
        if let Some(raw) = row.field("currency") {
            match CurrencyCode::new(raw) {
                Ok(c) if c == *file_currency => {}
                Ok(c) => errors.push(RowError::new(
                    row.row_number,
                    "currency",
                    ErrorCode::CurrencyMismatch,
                    format!("row currency {c} does not match file currency {file_currency}"),
                )),
                Err(_) => errors.push(RowError::new(
                    row.row_number,
                    "currency",
                    ErrorCode::CurrencyMismatch,
                    format!("unrecognized currency {raw:?}"),
                )),
            }
        }

        if row.field("beneficiary_id").is_none() {
            errors.push(RowError::new(
                row.row_number,
                "beneficiary_id",
                ErrorCode::MissingField,
                "beneficiary_id is required",
            ));
        }

        // Currency-specific required fields from the rule table.
        for field in &rule.required_fields {
            if row.field(field).is_none() {
                errors.push(RowError::new(
                    row.row_number,
                    field,
                    ErrorCode::MissingField,
                    format!("{field} is required for {file_currency} payments"),
                ));
            }
        }

        if rule.purpose_code_required && row.field("purpose_code").is_none() {
            errors.push(RowError::new(
                row.row_number,
                "purpose_code",
                ErrorCode::MissingField,
                format!("purpose_code is required for {file_currency} payments"),
            ));
        }

        if errors.is_empty() {
            candidates.push(InstructionCandidate {
                row_ordinal: row.row_number,
                beneficiary_ref: row
                    .field("beneficiary_id")
                    .expect("checked above")
                    .to_string(),
                amount: amount.expect("checked above"),
                currency: file_currency.clone(),
                purpose_code: row.field("purpose_code").map(str::to_string),
                invoice_number: row.field("invoice_number").map(str::to_string),
            });
        } else {
            row_errors.extend(errors);
        }
    }

    let error_rows = rows.len() - candidates.len();
    let computed_total = Amount::checked_sum(candidates.iter().map(|c| c.amount));

    Ok(ValidationReport {
        total_rows: rows.len(),
        valid_rows: candidates.len(),
        error_rows,
        row_errors,
        candidates,
        computed_total,
    })
}
